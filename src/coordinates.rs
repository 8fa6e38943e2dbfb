//! Conversion from the WGS-84 frame embedded in GPS metadata to the GCJ-02
//! frame used by the reverse-geocoding provider.
//!
//! The correction is the standard empirical polynomial + trigonometric series
//! over an offset ellipsoid. It is only meaningful inside the provider's
//! coverage region; outside it the input is returned unchanged. The geocoder
//! depends on this being reproduced exactly, so the constants below must not
//! be touched.

/// Krasovsky 1940 ellipsoid semi-major axis.
const A: f64 = 6_378_245.0;
/// First eccentricity squared.
const EE: f64 = 0.006_693_421_622_965_943;

/// Rough bounding box of the provider's coverage region. Coordinates outside
/// it carry no offset.
fn out_of_coverage(lat: f64, lon: f64) -> bool {
    !(72.004..=137.8347).contains(&lon) || !(0.8293..=55.8271).contains(&lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    let mut ret =
        -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += ((6.0 * x * std::f64::consts::PI).sin() * 20.0
        + (2.0 * x * std::f64::consts::PI).sin() * 20.0)
        * 2.0
        / 3.0;
    ret += ((y * std::f64::consts::PI).sin() * 20.0
        + (y / 3.0 * std::f64::consts::PI).sin() * 40.0)
        * 2.0
        / 3.0;
    ret += ((y / 12.0 * std::f64::consts::PI).sin() * 160.0
        + (y * std::f64::consts::PI / 30.0).sin() * 320.0)
        * 2.0
        / 3.0;
    ret
}

fn transform_lon(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += ((6.0 * x * std::f64::consts::PI).sin() * 20.0
        + (2.0 * x * std::f64::consts::PI).sin() * 20.0)
        * 2.0
        / 3.0;
    ret += ((x * std::f64::consts::PI).sin() * 20.0
        + (x / 3.0 * std::f64::consts::PI).sin() * 40.0)
        * 2.0
        / 3.0;
    ret += ((x / 12.0 * std::f64::consts::PI).sin() * 150.0
        + (x / 30.0 * std::f64::consts::PI).sin() * 300.0)
        * 2.0
        / 3.0;
    ret
}

/// Convert a WGS-84 coordinate to the display/geocoding frame.
pub fn wgs84_to_gcj02(lat: f64, lon: f64) -> (f64, f64) {
    if out_of_coverage(lat, lon) {
        return (lat, lon);
    }

    let dlat = transform_lat(lon - 105.0, lat - 35.0);
    let dlon = transform_lon(lon - 105.0, lat - 35.0);

    let rad_lat = lat / 180.0 * std::f64::consts::PI;
    let magic = 1.0 - EE * rad_lat.sin() * rad_lat.sin();
    let sqrt_magic = magic.sqrt();

    let dlat = (dlat * 180.0)
        / ((A * (1.0 - EE)) / (magic * sqrt_magic) * std::f64::consts::PI);
    let dlon = (dlon * 180.0) / (A / sqrt_magic * rad_lat.cos() * std::f64::consts::PI);

    (lat + dlat, lon + dlon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-4;

    fn assert_close(actual: (f64, f64), expected: (f64, f64)) {
        assert!(
            (actual.0 - expected.0).abs() < TOLERANCE,
            "latitude {} != {}",
            actual.0,
            expected.0
        );
        assert!(
            (actual.1 - expected.1).abs() < TOLERANCE,
            "longitude {} != {}",
            actual.1,
            expected.1
        );
    }

    #[test]
    fn tiananmen_reference_point() {
        let converted = wgs84_to_gcj02(39.9087, 116.3975);
        assert_close(converted, (39.910103, 116.403744));
    }

    #[test]
    fn known_city_reference_points() {
        assert_close(wgs84_to_gcj02(31.2304, 121.4737), (31.228458, 121.478223));
        assert_close(wgs84_to_gcj02(22.5431, 114.0579), (22.540383, 114.063014));
        assert_close(wgs84_to_gcj02(30.6586, 104.0647), (30.656177, 104.067205));
    }

    #[test]
    fn coordinates_outside_coverage_pass_through() {
        // San Francisco: no offset applies.
        assert_eq!(wgs84_to_gcj02(37.7749, -122.4194), (37.7749, -122.4194));
        assert_eq!(wgs84_to_gcj02(-33.8688, 151.2093), (-33.8688, 151.2093));
    }

    #[test]
    fn conversion_shifts_inside_coverage() {
        let (lat, lon) = wgs84_to_gcj02(39.9087, 116.3975);
        assert!((lat - 39.9087).abs() > TOLERANCE);
        assert!((lon - 116.3975).abs() > TOLERANCE);
    }
}
