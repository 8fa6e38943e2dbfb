use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::coordinates::wgs84_to_gcj02;

/// Sentinel shown whenever reverse geocoding is unavailable. Queries must
/// always carry some address string, even a useless one.
pub const UNKNOWN_ADDRESS: &str = "未知地点";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("request failed: {0}")]
    Transport(#[from] Box<ureq::Error>),
    #[error("response read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("provider rejected request: {0}")]
    Provider(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Structured address as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub province: String,
    /// Absent for direct-administered municipalities.
    pub city: Option<String>,
    pub district: String,
}

impl Address {
    /// Compose the display string. Municipalities come back without a city;
    /// the province stands in, and repeating it would read badly, so the
    /// province-as-city case collapses to province + district.
    pub fn display(&self) -> String {
        match &self.city {
            Some(city) if city != &self.province => {
                format!("{}{}{}", self.province, city, self.district)
            }
            _ => format!("{}{}", self.province, self.district),
        }
    }
}

/// Reduce a display address to its city+district label by dropping the
/// province prefix. Provinces end in `省`; municipal addresses carry no such
/// delimiter and are already city-level, so they pass through whole.
pub fn compress_address(address: &str) -> &str {
    match address.find('省') {
        Some(idx) => {
            let rest = &address[idx + '省'.len_utf8()..];
            if rest.is_empty() {
                address
            } else {
                rest
            }
        }
        None => address,
    }
}

/// Reverse geocoding over display-frame (GCJ-02) coordinates.
pub trait ReverseGeocoder: Send + Sync {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Address, GeocodeError>;
}

/// Amap regeo endpoint client with a bounded request timeout. A hung provider
/// fails the call; it must never hang the serving path.
pub struct AmapClient {
    agent: ureq::Agent,
    endpoint: String,
    key: String,
}

impl AmapClient {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.into(),
            key: key.into(),
        }
    }
}

impl ReverseGeocoder for AmapClient {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Address, GeocodeError> {
        let body: Value = self
            .agent
            .get(&self.endpoint)
            .query("key", &self.key)
            .query("location", &format!("{:.6},{:.6}", lon, lat))
            .call()
            .map_err(Box::new)?
            .into_json()?;

        parse_regeo_response(&body)
    }
}

/// Pull an [Address] out of a regeo response body. Province and district are
/// both mandatory; `city` is an empty array for direct-administered
/// municipalities and is the only level allowed to be absent.
fn parse_regeo_response(body: &Value) -> Result<Address, GeocodeError> {
    if body.get("status").and_then(Value::as_str) != Some("1") {
        let info = body
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(GeocodeError::Provider(info));
    }

    let component = body
        .pointer("/regeocode/addressComponent")
        .ok_or_else(|| GeocodeError::Malformed("missing addressComponent".to_string()))?;

    let text_level = |field: &str| -> Result<String, GeocodeError> {
        component
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GeocodeError::Malformed(format!("missing {}", field)))
    };

    let province = text_level("province")?;
    let district = text_level("district")?;
    let city = component
        .get("city")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    Ok(Address {
        province,
        city,
        district,
    })
}

type CacheKey = (i64, i64);

/// Process-lifetime memoization of resolved addresses, keyed by coordinate in
/// micro-degrees. Entries are immutable once written; concurrent writers of
/// the same key race harmlessly (the function is idempotent per input).
#[derive(Default)]
pub struct GeocodeCache {
    entries: Mutex<HashMap<CacheKey, String>>,
}

impl GeocodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(lat: f64, lon: f64) -> CacheKey {
        ((lat * 1e6).round() as i64, (lon * 1e6).round() as i64)
    }

    pub fn get(&self, lat: f64, lon: f64) -> Option<String> {
        self.entries.lock().ok()?.get(&Self::key(lat, lon)).cloned()
    }

    pub fn put(&self, lat: f64, lon: f64, value: String) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(Self::key(lat, lon), value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Place-name resolution for GPS-frame coordinates: convert to the display
/// frame, consult the provider, absorb every failure into the sentinel.
pub struct Geocoder {
    provider: Box<dyn ReverseGeocoder>,
    cache: GeocodeCache,
}

impl Geocoder {
    pub fn new(provider: Box<dyn ReverseGeocoder>) -> Self {
        Self {
            provider,
            cache: GeocodeCache::new(),
        }
    }

    /// Never fails. The cache is keyed by the pre-conversion coordinate, and
    /// sentinel results are cached too so a flaky endpoint is not hammered
    /// with retries for the process lifetime.
    pub fn resolve(&self, lat: f64, lon: f64) -> String {
        if let Some(hit) = self.cache.get(lat, lon) {
            debug!("Geocode cache hit for {:.6},{:.6}", lat, lon);
            return hit;
        }

        let (display_lat, display_lon) = wgs84_to_gcj02(lat, lon);
        let resolved = match self.provider.reverse(display_lat, display_lon) {
            Ok(address) => address.display(),
            Err(e) => {
                warn!("Reverse geocoding failed for {:.6},{:.6}: {}", lat, lon, e);
                UNKNOWN_ADDRESS.to_string()
            }
        };

        self.cache.put(lat, lon, resolved.clone());
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingProvider {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl ReverseGeocoder for CountingProvider {
        fn reverse(&self, _lat: f64, _lon: f64) -> Result<Address, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GeocodeError::Malformed("boom".to_string()));
            }
            Ok(Address {
                province: "广东省".to_string(),
                city: Some("深圳市".to_string()),
                district: "南山区".to_string(),
            })
        }
    }

    #[test]
    fn identical_coordinate_resolved_once() {
        let geocoder = Geocoder::new(Box::new(CountingProvider::new(false)));

        let first = geocoder.resolve(22.5431, 114.0579);
        let second = geocoder.resolve(22.5431, 114.0579);
        assert_eq!(first, "广东省深圳市南山区");
        assert_eq!(first, second);
    }

    #[test]
    fn cache_bounds_external_calls() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));

        struct SharedCounting(std::sync::Arc<AtomicUsize>);
        impl ReverseGeocoder for SharedCounting {
            fn reverse(&self, _lat: f64, _lon: f64) -> Result<Address, GeocodeError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Address {
                    province: "北京市".to_string(),
                    city: None,
                    district: "海淀区".to_string(),
                })
            }
        }

        let geocoder = Geocoder::new(Box::new(SharedCounting(counter.clone())));
        geocoder.resolve(39.99, 116.30);
        geocoder.resolve(39.99, 116.30);
        geocoder.resolve(39.99, 116.30);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // A different coordinate is a different key.
        geocoder.resolve(31.23, 121.47);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_return_sentinel_and_are_cached() {
        let counter = std::sync::Arc::new(AtomicUsize::new(0));

        struct FailingCounting(std::sync::Arc<AtomicUsize>);
        impl ReverseGeocoder for FailingCounting {
            fn reverse(&self, _lat: f64, _lon: f64) -> Result<Address, GeocodeError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(GeocodeError::Provider("DAILY_QUERY_OVER_LIMIT".to_string()))
            }
        }

        let geocoder = Geocoder::new(Box::new(FailingCounting(counter.clone())));
        assert_eq!(geocoder.resolve(39.9, 116.4), UNKNOWN_ADDRESS);
        assert_eq!(geocoder.resolve(39.9, 116.4), UNKNOWN_ADDRESS);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn municipality_display_collapses_city() {
        let address = Address {
            province: "北京市".to_string(),
            city: None,
            district: "海淀区".to_string(),
        };
        assert_eq!(address.display(), "北京市海淀区");

        let same_as_province = Address {
            province: "上海市".to_string(),
            city: Some("上海市".to_string()),
            district: "浦东新区".to_string(),
        };
        assert_eq!(same_as_province.display(), "上海市浦东新区");
    }

    #[test]
    fn provincial_display_keeps_all_levels() {
        let address = Address {
            province: "广东省".to_string(),
            city: Some("深圳市".to_string()),
            district: "南山区".to_string(),
        };
        assert_eq!(address.display(), "广东省深圳市南山区");
    }

    #[test]
    fn compress_strips_province_prefix() {
        assert_eq!(compress_address("广东省深圳市南山区"), "深圳市南山区");
        assert_eq!(compress_address("北京市海淀区"), "北京市海淀区");
        // No delimiter at all: fall back to the whole string.
        assert_eq!(compress_address(UNKNOWN_ADDRESS), UNKNOWN_ADDRESS);
        // Delimiter with nothing after it: keep the input.
        assert_eq!(compress_address("广东省"), "广东省");
    }

    fn regeo_body(province: Value, city: Value, district: Value) -> Value {
        serde_json::json!({
            "status": "1",
            "info": "OK",
            "regeocode": {
                "addressComponent": {
                    "province": province,
                    "city": city,
                    "district": district,
                }
            }
        })
    }

    #[test]
    fn response_parsing_handles_both_city_shapes() {
        let provincial = parse_regeo_response(&regeo_body(
            "广东省".into(),
            "深圳市".into(),
            "南山区".into(),
        ))
        .unwrap();
        assert_eq!(provincial.city.as_deref(), Some("深圳市"));

        // Municipalities report `city` as an empty array.
        let municipal = parse_regeo_response(&regeo_body(
            "北京市".into(),
            serde_json::json!([]),
            "海淀区".into(),
        ))
        .unwrap();
        assert_eq!(municipal.city, None);
        assert_eq!(municipal.display(), "北京市海淀区");
    }

    #[test]
    fn response_parsing_requires_province_and_district() {
        let no_province = parse_regeo_response(&regeo_body(
            serde_json::json!([]),
            "深圳市".into(),
            "南山区".into(),
        ));
        assert!(matches!(no_province, Err(GeocodeError::Malformed(_))));

        let no_district = parse_regeo_response(&regeo_body(
            "广东省".into(),
            "深圳市".into(),
            "".into(),
        ));
        assert!(matches!(no_district, Err(GeocodeError::Malformed(_))));
    }

    #[test]
    fn provider_rejection_carries_info() {
        let body = serde_json::json!({"status": "0", "info": "INVALID_USER_KEY"});
        match parse_regeo_response(&body) {
            Err(GeocodeError::Provider(info)) => assert_eq!(info, "INVALID_USER_KEY"),
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn cache_key_distinguishes_micro_degrees() {
        let cache = GeocodeCache::new();
        cache.put(39.900001, 116.4, "a".to_string());
        assert_eq!(cache.get(39.900001, 116.4).as_deref(), Some("a"));
        assert!(cache.get(39.900002, 116.4).is_none());
        assert_eq!(cache.len(), 1);
    }
}
