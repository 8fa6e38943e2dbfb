use serde::Serialize;

use crate::db::{self, DbPool, QueryFilter, TAKEN_AT_FORMAT};
use crate::geocode::{compress_address, Geocoder};

/// Cap on hotspot labels returned alongside a point query.
pub const HOTSPOT_LIMIT: usize = 5;

/// A stored point with its resolved place name attached.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedPoint {
    pub path: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: String,
    pub address: String,
}

#[derive(Debug, Serialize)]
pub struct PointsResponse {
    pub points: Vec<EnrichedPoint>,
    pub hotspots: Vec<String>,
}

/// Answer a point query: filtered records with addresses, plus up to
/// [HOTSPOT_LIMIT] coarse hotspot labels. Address resolution is amortized by
/// the geocode cache, so repeat coordinates cost one external call total.
pub fn get_points(
    pool: &DbPool,
    geocoder: &Geocoder,
    filter: &QueryFilter,
) -> Result<PointsResponse, Box<dyn std::error::Error>> {
    let records = db::query(pool, filter)?;

    let points = records
        .into_iter()
        .map(|record| {
            let address = geocoder.resolve(record.latitude, record.longitude);
            EnrichedPoint {
                path: record.path,
                latitude: record.latitude,
                longitude: record.longitude,
                altitude: record.altitude,
                timestamp: record.taken_at.format(TAKEN_AT_FORMAT).to_string(),
                address,
            }
        })
        .collect();

    let hotspots = hotspot_addresses(pool, geocoder)?;

    Ok(PointsResponse { points, hotspots })
}

/// City+district labels for the densest grid cells, one representative point
/// per cell. Aggregation order is deterministic, and so is this list.
pub fn hotspot_addresses(
    pool: &DbPool,
    geocoder: &Geocoder,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let cells = db::aggregate_cells(pool, HOTSPOT_LIMIT)?;

    let mut labels = Vec::with_capacity(cells.len());
    for (cell, _count) in cells {
        if let Some((lat, lon)) = db::sample_in_cell(pool, cell)? {
            let address = geocoder.resolve(lat, lon);
            labels.push(compress_address(&address).to_string());
        }
    }

    labels.truncate(HOTSPOT_LIMIT);
    Ok(labels)
}
