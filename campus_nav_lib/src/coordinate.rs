use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo_util;

/// A WGS84 position. Construction always validates the ranges, so any
/// `Coordinate` in hand is a usable one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
    #[error("expected \"lat,lng\", got {0:?}")]
    Malformed(String),
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        // NaN fails both range checks
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::Longitude(lng));
        }

        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        geo_util::haversine_m(*self, *other)
    }

    /// Initial bearing towards `other`, degrees clockwise from north.
    pub fn bearing_to(&self, other: &Coordinate) -> f64 {
        geo_util::bearing_deg(*self, *other)
    }
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.lat, raw.lng)
    }
}

impl From<Coordinate> for geo_types::Point<f64> {
    fn from(coordinate: Coordinate) -> Self {
        geo_types::Point::new(coordinate.lng, coordinate.lat)
    }
}

impl TryFrom<geo_types::Point<f64>> for Coordinate {
    type Error = CoordinateError;

    fn try_from(point: geo_types::Point<f64>) -> Result<Self, Self::Error> {
        Coordinate::new(point.y(), point.x())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lng)
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((lat, lng)) = s.split_once(',') else {
            return Err(CoordinateError::Malformed(s.to_owned()));
        };

        let lat = lat.trim().parse::<f64>().map_err(|_| CoordinateError::Malformed(s.to_owned()))?;
        let lng = lng.trim().parse::<f64>().map_err(|_| CoordinateError::Malformed(s.to_owned()))?;

        Coordinate::new(lat, lng)
    }
}
