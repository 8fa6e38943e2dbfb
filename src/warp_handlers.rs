use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{reject, Rejection, Reply};

use crate::db::{BoundingBox, DbPool, QueryFilter, TimeRange};
use crate::geocode::Geocoder;
use crate::query_engine;
use crate::warp_helpers::{DatabaseError, InvalidQuery};

#[derive(Debug, Deserialize)]
pub struct PointsQuery {
    pub lat_min: Option<f64>,
    pub lat_max: Option<f64>,
    pub lon_min: Option<f64>,
    pub lon_max: Option<f64>,
    pub start: Option<String>,
    pub end: Option<String>,
}

pub async fn health_check() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn ready_check(db_pool: DbPool) -> Result<impl Reply, Rejection> {
    match db_pool.get() {
        Ok(_) => Ok(warp::reply::json(&json!({
            "status": "ready",
            "database": "connected",
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))),
        Err(e) => {
            log::error!("Database connection failed: {}", e);
            Err(reject::custom(DatabaseError {
                message: "Database connection failed".to_string(),
            }))
        }
    }
}

pub async fn get_points(
    query: PointsQuery,
    db_pool: DbPool,
    geocoder: Arc<Geocoder>,
) -> Result<impl Reply, Rejection> {
    let filter =
        build_filter(&query).map_err(|message| reject::custom(InvalidQuery { message }))?;

    match query_engine::get_points(&db_pool, &geocoder, &filter) {
        Ok(response) => Ok(warp::reply::json(&response)),
        Err(e) => {
            log::error!("Point query failed: {}", e);
            Err(reject::custom(DatabaseError {
                message: format!("Point query failed: {}", e),
            }))
        }
    }
}

fn build_filter(query: &PointsQuery) -> Result<QueryFilter, String> {
    let bounds = match (query.lat_min, query.lat_max, query.lon_min, query.lon_max) {
        (Some(lat_a), Some(lat_b), Some(lon_a), Some(lon_b)) => {
            Some(BoundingBox::new(lat_a, lat_b, lon_a, lon_b))
        }
        (None, None, None, None) => None,
        _ => {
            return Err(
                "bounding box requires lat_min, lat_max, lon_min and lon_max".to_string(),
            )
        }
    };

    let time = match (query.start.as_deref(), query.end.as_deref()) {
        (Some(start), Some(end)) => Some(TimeRange {
            start: parse_time_bound(start, false)?,
            end: parse_time_bound(end, true)?,
        }),
        (None, None) => None,
        _ => return Err("time range requires both start and end".to_string()),
    };

    Ok(QueryFilter { bounds, time })
}

/// Accept a full timestamp or a bare date. A bare date expands to the start
/// or end of that day depending on which bound it is, keeping the range
/// inclusive either way.
fn parse_time_bound(value: &str, end_of_day: bool) -> Result<NaiveDateTime, String> {
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(timestamp);
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let expanded = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(timestamp) = expanded {
            return Ok(timestamp);
        }
    }

    Err(format!(
        "invalid timestamp '{}': expected %Y-%m-%dT%H:%M:%S or %Y-%m-%d",
        value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(
        bounds: Option<(f64, f64, f64, f64)>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> PointsQuery {
        PointsQuery {
            lat_min: bounds.map(|b| b.0),
            lat_max: bounds.map(|b| b.1),
            lon_min: bounds.map(|b| b.2),
            lon_max: bounds.map(|b| b.3),
            start: start.map(str::to_string),
            end: end.map(str::to_string),
        }
    }

    #[test]
    fn empty_query_means_full_scan() {
        let filter = build_filter(&query(None, None, None)).unwrap();
        assert!(filter.bounds.is_none());
        assert!(filter.time.is_none());
    }

    #[test]
    fn partial_bounding_box_is_rejected() {
        let mut q = query(None, None, None);
        q.lat_min = Some(10.0);
        assert!(build_filter(&q).is_err());
    }

    #[test]
    fn partial_time_range_is_rejected() {
        assert!(build_filter(&query(None, Some("2023-01-01"), None)).is_err());
    }

    #[test]
    fn bare_dates_expand_to_day_bounds() {
        let filter =
            build_filter(&query(None, Some("2023-01-01"), Some("2023-01-02"))).unwrap();
        let time = filter.time.unwrap();
        assert_eq!(time.start.to_string(), "2023-01-01 00:00:00");
        assert_eq!(time.end.to_string(), "2023-01-02 23:59:59");
    }

    #[test]
    fn full_timestamps_pass_through() {
        let filter = build_filter(&query(
            None,
            Some("2023-01-01T08:30:00"),
            Some("2023-01-01T09:00:00"),
        ))
        .unwrap();
        let time = filter.time.unwrap();
        assert_eq!(time.start.to_string(), "2023-01-01 08:30:00");
        assert_eq!(time.end.to_string(), "2023-01-01 09:00:00");
    }

    #[test]
    fn garbage_timestamp_is_rejected() {
        assert!(build_filter(&query(None, Some("yesterday"), Some("today"))).is_err());
    }
}
