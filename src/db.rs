use chrono::NaiveDateTime;
use rusqlite::{params, Result as SqlResult, Row};
use serde::Serialize;

pub use crate::db_pool::{create_db_pool, create_in_memory_pool, DbPool};

/// Storage format for capture timestamps. Fixed-width and zero-padded, so
/// BETWEEN on the text column matches chronological order.
pub const TAKEN_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Grid precision for hotspot aggregation: one decimal place of a degree,
/// roughly 11 km of latitude per cell. Coarse on purpose. The aggregation
/// SQL is built from this constant, so [GridCell::containing] and the
/// queries cannot disagree.
const GRID_SCALE: i64 = 10;

/// One indexed media file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRecord {
    pub path: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub taken_at: NaiveDateTime,
    /// Filesystem mtime (unix seconds) at the moment of extraction. Change
    /// detection only, not a domain timestamp.
    pub file_modified: i64,
}

impl MediaRecord {
    fn from_row(row: &Row) -> SqlResult<Self> {
        let taken_raw: String = row.get(4)?;
        let taken_at = NaiveDateTime::parse_from_str(&taken_raw, TAKEN_AT_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(MediaRecord {
            path: row.get(0)?,
            latitude: row.get(1)?,
            longitude: row.get(2)?,
            altitude: row.get(3)?,
            taken_at,
            file_modified: row.get(5)?,
        })
    }
}

/// Spatial filter, normalized so min <= max regardless of input order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_a: f64, lat_b: f64, lon_a: f64, lon_b: f64) -> Self {
        BoundingBox {
            lat_min: lat_a.min(lat_b),
            lat_max: lat_a.max(lat_b),
            lon_min: lon_a.min(lon_b),
            lon_max: lon_a.max(lon_b),
        }
    }
}

/// Inclusive capture-time range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Conjunction of optional predicates; no predicates means a full scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFilter {
    pub bounds: Option<BoundingBox>,
    pub time: Option<TimeRange>,
}

/// Hotspot grid cell in tenths of a degree, truncated toward zero (matching
/// SQLite's CAST semantics).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridCell {
    pub lat: i32,
    pub lon: i32,
}

impl GridCell {
    pub fn containing(latitude: f64, longitude: f64) -> Self {
        GridCell {
            lat: (latitude * GRID_SCALE as f64) as i32,
            lon: (longitude * GRID_SCALE as f64) as i32,
        }
    }
}

/// Last recorded filesystem mtime for a path, if the path has ever been
/// successfully ingested.
pub fn get_last_modified(
    pool: &DbPool,
    path: &str,
) -> Result<Option<i64>, Box<dyn std::error::Error>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT file_modified FROM media WHERE path = ?")?;

    match stmt.query_row([path], |row| row.get::<_, i64>(0)) {
        Ok(mtime) => Ok(Some(mtime)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Box::new(e)),
    }
}

/// Upsert a batch of records in one transaction. All-or-nothing: an error on
/// any row rolls the whole batch back.
pub fn upsert_batch(
    pool: &DbPool,
    records: &[MediaRecord],
) -> Result<usize, Box<dyn std::error::Error>> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    for record in records {
        tx.execute(
            r#"
            INSERT OR REPLACE INTO media
                (path, latitude, longitude, altitude, taken_at, file_modified)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.path,
                record.latitude,
                record.longitude,
                record.altitude,
                record.taken_at.format(TAKEN_AT_FORMAT).to_string(),
                record.file_modified,
            ],
        )?;
    }

    tx.commit()?;
    Ok(records.len())
}

/// Query records matching the filter. Time-scoped results come back in
/// ascending capture-time order; spatial-only queries have no mandated order.
pub fn query(
    pool: &DbPool,
    filter: &QueryFilter,
) -> Result<Vec<MediaRecord>, Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let mut sql = String::from(
        "SELECT path, latitude, longitude, altitude, taken_at, file_modified FROM media WHERE 1=1",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(bounds) = &filter.bounds {
        sql.push_str(" AND latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?");
        params.push(Box::new(bounds.lat_min));
        params.push(Box::new(bounds.lat_max));
        params.push(Box::new(bounds.lon_min));
        params.push(Box::new(bounds.lon_max));
    }

    if let Some(time) = &filter.time {
        sql.push_str(" AND taken_at BETWEEN ? AND ?");
        params.push(Box::new(time.start.format(TAKEN_AT_FORMAT).to_string()));
        params.push(Box::new(time.end.format(TAKEN_AT_FORMAT).to_string()));
        sql.push_str(" ORDER BY taken_at ASC");
    }

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let record_iter = stmt.query_map(param_refs.as_slice(), MediaRecord::from_row)?;

    let mut records = Vec::new();
    for record in record_iter {
        records.push(record?);
    }
    Ok(records)
}

/// Top-k grid cells by record count. Ranked by count descending, ties broken
/// by cell identity so repeated calls on an unchanged store are reproducible.
pub fn aggregate_cells(
    pool: &DbPool,
    k: usize,
) -> Result<Vec<(GridCell, i64)>, Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let sql = format!(
        "SELECT CAST(latitude * {scale} AS INTEGER) AS cell_lat, \
                CAST(longitude * {scale} AS INTEGER) AS cell_lon, \
                COUNT(*) AS n \
         FROM media \
         GROUP BY cell_lat, cell_lon \
         ORDER BY n DESC, cell_lat, cell_lon \
         LIMIT ?",
        scale = GRID_SCALE
    );
    let mut stmt = conn.prepare(&sql)?;

    let cell_iter = stmt.query_map([k as i64], |row| {
        Ok((
            GridCell {
                lat: row.get(0)?,
                lon: row.get(1)?,
            },
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut cells = Vec::new();
    for cell in cell_iter {
        cells.push(cell?);
    }
    Ok(cells)
}

/// One representative coordinate inside a grid cell, chosen deterministically
/// (smallest path wins).
pub fn sample_in_cell(
    pool: &DbPool,
    cell: GridCell,
) -> Result<Option<(f64, f64)>, Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    let sql = format!(
        "SELECT latitude, longitude \
         FROM media \
         WHERE CAST(latitude * {scale} AS INTEGER) = ? \
           AND CAST(longitude * {scale} AS INTEGER) = ? \
         ORDER BY path \
         LIMIT 1",
        scale = GRID_SCALE
    );
    let mut stmt = conn.prepare(&sql)?;

    match stmt.query_row(params![cell.lat, cell.lon], |row| {
        Ok((row.get::<_, f64>(0)?, row.get::<_, f64>(1)?))
    }) {
        Ok(point) => Ok(Some(point)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Box::new(e)),
    }
}
