use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

use crate::error::{validation_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(validation_error("coordinates must be finite numbers"));
        }

        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(validation_error("latitude must be between -90 and 90"));
        }

        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(validation_error("longitude must be between -180 and 180"));
        }

        Ok(())
    }
}

impl From<Coordinates> for Geometry<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Geometry::Point(Point::new(coordinates.lng, coordinates.lat))
    }
}

#[test]
fn coordinates_validation() {
    assert!(Coordinates::new(14.5995, 120.9842).validate().is_ok());
    assert!(Coordinates::new(90.0, -180.0).validate().is_ok());

    assert!(Coordinates::new(90.5, 0.0).validate().is_err());
    assert!(Coordinates::new(0.0, 180.1).validate().is_err());
    assert!(Coordinates::new(f64::NAN, 0.0).validate().is_err());
    assert!(Coordinates::new(0.0, f64::INFINITY).validate().is_err());
}
