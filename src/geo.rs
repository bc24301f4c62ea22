//! Great-circle distance, geofences and the grid cells backing the nearby-request index.

use serde::{Deserialize, Serialize};

use crate::entities::Coordinates;
use crate::error::{validation_error, Error};

/// Spherical earth radius used by every distance comparison in the service.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two points in meters.
pub fn distance_meters(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat_a.cos() * lat_b.cos() * (delta_lng / 2.0).sin().powi(2);

    // rounding can push h a hair above 1 for antipodal points
    let c = 2.0 * h.min(1.0).sqrt().asin();

    EARTH_RADIUS_METERS * c
}

/// Inclusive: a point exactly `radius_meters` away is inside.
pub fn within_radius(point: &Coordinates, center: &Coordinates, radius_meters: f64) -> bool {
    distance_meters(point, center) <= radius_meters
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceArea {
    pub center: Coordinates,
    pub radius_meters: f64,
}

impl ServiceArea {
    pub fn new(center: Coordinates, radius_meters: f64) -> Self {
        Self {
            center,
            radius_meters,
        }
    }

    pub fn contains(&self, point: &Coordinates) -> bool {
        within_radius(point, &self.center, self.radius_meters)
    }

    pub fn ensure_contains(&self, point: &Coordinates, what: &str) -> Result<(), Error> {
        if self.contains(point) {
            return Ok(());
        }

        Err(validation_error(format!("{} is outside the service area", what)))
    }
}

/// Cell edge length of the geo index grid, in degrees (about 1.1 km of latitude).
pub const CELL_SIZE_DEGREES: f64 = 0.01;

const LAT_CELLS: i32 = (180.0 / CELL_SIZE_DEGREES) as i32;
const LNG_CELLS: i32 = (360.0 / CELL_SIZE_DEGREES) as i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoCell {
    pub lat_index: i32,
    pub lng_index: i32,
}

impl GeoCell {
    pub fn of(point: &Coordinates) -> Self {
        Self {
            lat_index: lat_index(point.lat),
            lng_index: lng_index(point.lng),
        }
    }

    /// Every cell that may hold a point within `radius_meters` of `center`, or `None` when that
    /// would be more than `limit` cells.
    ///
    /// Uses the spherical bounding box of the circle; near the poles or when the circle wraps
    /// the whole longitude range every longitude column is counted. The size is known before
    /// anything is allocated.
    pub fn covering(
        center: &Coordinates,
        radius_meters: f64,
        limit: usize,
    ) -> Option<Vec<GeoCell>> {
        let angular = radius_meters.max(0.0) / EARTH_RADIUS_METERS;
        let lat = center.lat.to_radians();

        let lat_min = (lat - angular).to_degrees().max(-90.0);
        let lat_max = (lat + angular).to_degrees().min(90.0);
        let rows = lat_index(lat_min)..=lat_index(lat_max);

        let full_longitude = lat_min <= -90.0
            || lat_max >= 90.0
            || angular >= std::f64::consts::FRAC_PI_2
            || angular.sin() >= lat.cos();

        let (first, last) = if full_longitude {
            (0, LNG_CELLS - 1)
        } else {
            let delta = (angular.sin() / lat.cos()).asin().to_degrees();
            let first = ((center.lng - delta + 180.0) / CELL_SIZE_DEGREES).floor() as i32;
            let last = ((center.lng + delta + 180.0) / CELL_SIZE_DEGREES).floor() as i32;

            if last - first + 1 >= LNG_CELLS {
                (0, LNG_CELLS - 1)
            } else {
                (first, last)
            }
        };

        let row_count = (rows.end() - rows.start() + 1) as usize;
        let column_count = (last - first + 1) as usize;
        if row_count.saturating_mul(column_count) > limit {
            return None;
        }

        let mut cells = Vec::with_capacity(row_count * column_count);
        for lat_index in rows {
            for column in first..=last {
                cells.push(GeoCell {
                    lat_index,
                    lng_index: column.rem_euclid(LNG_CELLS),
                });
            }
        }

        Some(cells)
    }
}

fn lat_index(lat: f64) -> i32 {
    (((lat + 90.0) / CELL_SIZE_DEGREES).floor() as i32).clamp(0, LAT_CELLS - 1)
}

fn lng_index(lng: f64) -> i32 {
    (((lng + 180.0) / CELL_SIZE_DEGREES).floor() as i32).rem_euclid(LNG_CELLS)
}

/// Point `meters` due north of `origin`; test fixture helper.
#[cfg(test)]
pub(crate) fn offset_north(origin: &Coordinates, meters: f64) -> Coordinates {
    Coordinates::new(
        origin.lat + (meters / EARTH_RADIUS_METERS).to_degrees(),
        origin.lng,
    )
}

#[test]
fn distance_between_known_points() {
    // Manila City Hall to Quezon Memorial Circle is roughly 10.6 km
    let manila = Coordinates::new(14.5896, 120.9811);
    let quezon = Coordinates::new(14.6514, 121.0493);

    let distance = distance_meters(&manila, &quezon);
    assert!(distance > 9_500.0 && distance < 11_000.0);

    assert_eq!(distance_meters(&manila, &manila), 0.0);
    assert!((distance_meters(&manila, &quezon) - distance_meters(&quezon, &manila)).abs() < 1e-6);
}

#[test]
fn distance_along_meridian_matches_arc_length() {
    let origin = Coordinates::new(10.0, 123.0);
    let north = offset_north(&origin, 500.0);

    assert!((distance_meters(&origin, &north) - 500.0).abs() < 1e-6);
}

#[test]
fn distance_is_total_for_antipodes() {
    let a = Coordinates::new(0.0, 0.0);
    let b = Coordinates::new(0.0, 180.0);

    let distance = distance_meters(&a, &b);
    assert!(distance.is_finite());
    assert!((distance - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1.0);
}

#[test]
fn within_radius_is_inclusive() {
    let center = Coordinates::new(14.5995, 120.9842);
    let point = offset_north(&center, 300.0);
    let exact = distance_meters(&point, &center);

    assert!(within_radius(&point, &center, exact));
    assert!(!within_radius(&point, &center, exact - 1e-6));
    assert!(within_radius(&center, &center, 0.0));
}

#[test]
fn service_area_containment() {
    let area = ServiceArea::new(Coordinates::new(14.5995, 120.9842), 5_000.0);

    assert!(area.contains(&offset_north(&area.center, 4_000.0)));
    assert!(!area.contains(&offset_north(&area.center, 6_000.0)));
    assert!(area
        .ensure_contains(&offset_north(&area.center, 6_000.0), "pickup")
        .unwrap_err()
        .is_validation_error());
}

#[test]
fn covering_includes_cells_of_nearby_points() {
    let center = Coordinates::new(14.5995, 120.9842);
    let cells = GeoCell::covering(&center, 3_000.0, usize::MAX).unwrap();

    for bearing in 0..16 {
        let angle = (bearing as f64) * std::f64::consts::PI / 8.0;
        let d = 2_900.0 / EARTH_RADIUS_METERS;
        let point = Coordinates::new(
            center.lat + (d * angle.cos()).to_degrees(),
            center.lng + (d * angle.sin() / center.lat.to_radians().cos()).to_degrees(),
        );

        assert!(distance_meters(&center, &point) <= 3_000.0);
        assert!(cells.contains(&GeoCell::of(&point)));
    }
}

#[test]
fn covering_wraps_the_antimeridian() {
    let center = Coordinates::new(-16.5, 179.999);
    let east = Coordinates::new(-16.5, -179.995);

    assert!(distance_meters(&center, &east) < 2_000.0);
    let cells = GeoCell::covering(&center, 2_000.0, usize::MAX).unwrap();
    assert!(cells.contains(&GeoCell::of(&east)));
    assert!(cells.iter().all(|cell| (0..LNG_CELLS).contains(&cell.lng_index)));
}

#[test]
fn covering_gives_up_past_the_limit() {
    let manila = Coordinates::new(14.5995, 120.9842);
    let pole = Coordinates::new(89.999, 0.0);

    // a 3 km circle spans a handful of rows and columns
    let small = GeoCell::covering(&manila, 3_000.0, 100).unwrap();
    assert!(!small.is_empty() && small.len() <= 100);

    assert!(GeoCell::covering(&manila, 3_000.0, small.len() - 1).is_none());

    // every longitude column at the pole, far past any sane limit
    assert!(GeoCell::covering(&pole, 1_000.0, 10_000).is_none());
    assert!(GeoCell::covering(&manila, 20_000_000.0, 10_000).is_none());
}
