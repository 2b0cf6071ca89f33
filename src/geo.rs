use serde::{Deserialize, Serialize};

/// A validated geographic coordinate.
///
/// Construction goes through [`GeoPoint::new`], which rejects out-of-range
/// values and the `(0,0)` null-island artifact many backend records default
/// to. Invalid input means "absent", never "zero".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Validate and construct a coordinate. Returns `None` for non-finite or
    /// out-of-range values, and for exactly `(0,0)`.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        if lat == 0.0 && lng == 0.0 {
            return None;
        }
        Some(Self { lat, lng })
    }
}

/// Normalize a pair of optional raw coordinates into a validated point.
///
/// This is the single ingestion-boundary helper used for every snapshot and
/// payload; downstream components never see raw lat/lng pairs.
#[must_use]
pub fn opt_point(lat: Option<f64>, lng: Option<f64>) -> Option<GeoPoint> {
    GeoPoint::new(lat?, lng?)
}

/// Calculate distance between two points using the Haversine formula (in meters).
#[must_use]
pub fn haversine_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let r = 6_371_000.0; // Earth's radius in meters

    let lat1_rad = a.lat.to_radians();
    let lat2_rad = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    r * c
}

/// The geographic rectangle currently visible on the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl ViewportBounds {
    /// A bounds rectangle is usable when it is finite, properly ordered, and
    /// in range. A zero-size map container produces degenerate bounds that
    /// fail this check; callers treat that as "not laid out yet" and retry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let finite = self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite();
        finite
            && self.west < self.east
            && self.south < self.north
            && (-90.0..=90.0).contains(&self.south)
            && (-90.0..=90.0).contains(&self.north)
            && (-180.0..=180.0).contains(&self.west)
            && (-180.0..=180.0).contains(&self.east)
    }

    #[must_use]
    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat >= self.south
            && point.lat <= self.north
            && point.lng >= self.west
            && point.lng <= self.east
    }

    #[must_use]
    pub fn center(&self) -> Option<GeoPoint> {
        GeoPoint::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }
}

/// Web Mercator projection utilities.
pub struct WebMercator;

impl WebMercator {
    /// Convert latitude to Web Mercator Y tile coordinate at a zoom level.
    #[must_use]
    pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
        let lat_rad = lat.clamp(-85.0511, 85.0511).to_radians();
        let n = 2_f64.powi(i32::from(zoom));
        let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
        y * n
    }

    /// Convert longitude to Web Mercator X tile coordinate at a zoom level.
    #[must_use]
    pub fn lng_to_x(lng: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        ((lng + 180.0) / 360.0) * n
    }

    /// Convert a Web Mercator Y tile coordinate back to latitude.
    #[must_use]
    pub fn y_to_lat(y: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        let lat_rad = ((std::f64::consts::PI * (1.0 - 2.0 * y / n)).sinh()).atan();
        lat_rad.to_degrees()
    }

    /// Convert a Web Mercator X tile coordinate back to longitude.
    #[must_use]
    pub fn x_to_lng(x: f64, zoom: u8) -> f64 {
        let n = 2_f64.powi(i32::from(zoom));
        x / n * 360.0 - 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_validation() {
        assert!(GeoPoint::new(9.65, -82.75).is_some());
        assert!(GeoPoint::new(90.1, 0.0).is_none());
        assert!(GeoPoint::new(0.0, -180.1).is_none());
        assert!(GeoPoint::new(f64::NAN, 0.0).is_none());
        // Null island is an artifact, not a position
        assert!(GeoPoint::new(0.0, 0.0).is_none());
        // Zero on one axis alone is fine
        assert!(GeoPoint::new(0.0, -82.75).is_some());
    }

    #[test]
    fn test_opt_point() {
        assert!(opt_point(Some(9.65), Some(-82.75)).is_some());
        assert!(opt_point(Some(9.65), None).is_none());
        assert!(opt_point(None, None).is_none());
    }

    #[test]
    fn test_haversine() {
        let a = GeoPoint::new(9.65, -82.75).unwrap();
        let b = GeoPoint::new(9.66, -82.75).unwrap();
        // One hundredth of a degree of latitude is ~1.11 km
        let d = haversine_distance_m(a, b);
        assert!((d - 1112.0).abs() < 10.0);
    }

    #[test]
    fn test_bounds_validity() {
        let good = ViewportBounds { west: -82.80, south: 9.60, east: -82.70, north: 9.70 };
        assert!(good.is_valid());

        let inverted = ViewportBounds { west: -82.70, south: 9.60, east: -82.80, north: 9.70 };
        assert!(!inverted.is_valid());

        let degenerate = ViewportBounds { west: 0.0, south: 0.0, east: 0.0, north: 0.0 };
        assert!(!degenerate.is_valid());
    }

    #[test]
    fn test_bounds_contains() {
        let bounds = ViewportBounds { west: -82.80, south: 9.60, east: -82.70, north: 9.70 };
        assert!(bounds.contains(GeoPoint::new(9.65, -82.75).unwrap()));
        assert!(!bounds.contains(GeoPoint::new(9.75, -82.75).unwrap()));
    }

    #[test]
    fn test_mercator_round_trip() {
        let lat = 9.65;
        let lng = -82.75;
        let x = WebMercator::lng_to_x(lng, 12);
        let y = WebMercator::lat_to_y(lat, 12);
        assert!((WebMercator::x_to_lng(x, 12) - lng).abs() < 1e-9);
        assert!((WebMercator::y_to_lat(y, 12) - lat).abs() < 1e-9);
    }
}
