use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{coordinate::Coordinate, geo_util};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: Coordinate,
    pub end: Coordinate,
}

impl RouteRequest {
    pub fn new(start: Coordinate, end: Coordinate) -> Self {
        Self { start, end }
    }

    /// Query parameters of `GET {base}/route`.
    pub fn query_pairs(&self) -> [(&'static str, f64); 4] {
        [
            ("start_lat", self.start.lat()),
            ("start_lng", self.start.lng()),
            ("end_lat", self.end.lat()),
            ("end_lng", self.end.lng()),
        ]
    }
}

/// A computed route. The path always holds at least two points and runs from
/// `start` to `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub start: Coordinate,
    pub end: Coordinate,
    pub path_coordinates: Vec<Coordinate>,
    pub total_distance_m: f64,
    pub estimated_time_minutes: f64,
}

impl RouteResult {
    pub fn path_length_m(&self) -> f64 {
        geo_util::path_length_m(&self.path_coordinates)
    }
}

/// The backend's success/failure wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<WireRoute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RouteEnvelope {
    pub fn found(route: WireRoute) -> Self {
        Self {
            success: true,
            route: Some(route),
            error: None,
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            success: false,
            route: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRoute {
    pub start: Coordinate,
    pub end: Coordinate,
    pub path_coordinates: Vec<Coordinate>,
    pub total_distance: f64,
    pub estimated_time_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteShapeError {
    #[error("total distance {0} is not a non-negative number")]
    Distance(f64),
    #[error("estimated time {0} is not a non-negative number")]
    Time(f64),
}

impl TryFrom<WireRoute> for RouteResult {
    type Error = RouteShapeError;

    fn try_from(wire: WireRoute) -> Result<Self, Self::Error> {
        if !(wire.total_distance.is_finite() && wire.total_distance >= 0.) {
            return Err(RouteShapeError::Distance(wire.total_distance));
        }
        if !(wire.estimated_time_minutes.is_finite() && wire.estimated_time_minutes >= 0.) {
            return Err(RouteShapeError::Time(wire.estimated_time_minutes));
        }

        let path_coordinates = anchor_path(wire.start, wire.end, wire.path_coordinates);

        Ok(Self {
            start: wire.start,
            end: wire.end,
            path_coordinates,
            total_distance_m: wire.total_distance,
            estimated_time_minutes: wire.estimated_time_minutes,
        })
    }
}

/// Makes the path run from `start` to `end`, adding either endpoint when the
/// backend left it out, so a route never has fewer than two points.
fn anchor_path(start: Coordinate, end: Coordinate, path: Vec<Coordinate>) -> Vec<Coordinate> {
    let mut anchored = Vec::with_capacity(path.len() + 2);
    if path.first() != Some(&start) {
        anchored.push(start);
    }
    anchored.extend(path);
    if anchored.len() < 2 || anchored.last() != Some(&end) {
        anchored.push(end);
    }
    anchored
}
