use campus_nav_lib::{
    coordinate::Coordinate, directions::Instruction, geo_util, location_sample::LocationSample, route::RouteResult,
};
use serde::Serialize;

use crate::sampler::SensorError;

use super::SessionSettings;

/// Where the user stands relative to the planned route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NavigationProgress {
    pub position: Coordinate,
    pub accuracy_m: f64,
    /// Straight line, used for arrival.
    pub distance_to_destination_m: f64,
    /// Along the route from the projected position.
    pub remaining_route_m: f64,
    pub off_route_m: f64,
    pub off_route: bool,
    pub bearing_to_destination_deg: f64,
    pub heading_deg: Option<f64>,
    /// Index into the route's instructions.
    pub next_instruction: Option<usize>,
    pub distance_to_next_m: Option<f64>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavigationEvent {
    Arrived,
    LeftRoute,
    RejoinedRoute,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NavigationUpdate {
    Moved {
        progress: NavigationProgress,
        event: Option<NavigationEvent>,
    },
    TrackingLost {
        error: SensorError,
        failures: u32,
    },
}

/// Live state of one navigation run toward the route's end.
#[derive(Debug, Clone)]
pub struct NavigationSession {
    pub destination: Coordinate,
    pub destination_label: String,
    /// Whether samples are currently arriving.
    pub active: bool,
    pub arrived: bool,
    pub off_route: bool,
    pub consecutive_failures: u32,
    pub last_progress: Option<NavigationProgress>,

    path: Vec<Coordinate>,
    path_length_m: f64,
    /// Distance along the path to each vertex.
    vertex_along_m: Vec<f64>,
    instruction_vertices: Vec<usize>,
}

impl NavigationSession {
    pub fn new(route: &RouteResult, instructions: &[Instruction], destination_label: impl Into<String>) -> Self {
        let path = route.path_coordinates.clone();

        let mut vertex_along_m = Vec::with_capacity(path.len());
        let mut walked = 0.;
        for (i, point) in path.iter().enumerate() {
            if i > 0 {
                walked += geo_util::haversine_m(path[i - 1], *point);
            }
            vertex_along_m.push(walked);
        }

        Self {
            destination: route.end,
            destination_label: destination_label.into(),
            active: true,
            arrived: false,
            off_route: false,
            consecutive_failures: 0,
            last_progress: None,
            path,
            path_length_m: walked,
            vertex_along_m,
            instruction_vertices: instructions.iter().map(|i| i.vertex).collect(),
        }
    }

    pub fn advance(&mut self, sample: &LocationSample, settings: &SessionSettings) -> NavigationUpdate {
        let position = sample.coordinate;
        let distance_to_destination_m = geo_util::haversine_m(position, self.destination);

        let (off_route_m, along_m) = match geo_util::project_onto_path(position, &self.path) {
            Some(projection) => (projection.offset_m, projection.along_m),
            None => (0., self.path_length_m - distance_to_destination_m),
        };
        let off_route = off_route_m > settings.deviation_threshold_m;

        let next_instruction = self
            .instruction_vertices
            .iter()
            .position(|&vertex| self.vertex_along_m.get(vertex).is_some_and(|&a| a > along_m));
        let distance_to_next_m = next_instruction.map(|i| self.vertex_along_m[self.instruction_vertices[i]] - along_m);

        let progress = NavigationProgress {
            position,
            accuracy_m: sample.accuracy_m,
            distance_to_destination_m,
            remaining_route_m: (self.path_length_m - along_m).max(0.),
            off_route_m,
            off_route,
            bearing_to_destination_deg: geo_util::bearing_deg(position, self.destination),
            heading_deg: sample.heading_deg,
            next_instruction,
            distance_to_next_m,
            timestamp_ms: sample.timestamp_ms,
        };

        let event = if !self.arrived && distance_to_destination_m <= settings.arrival_radius_m {
            self.arrived = true;
            Some(NavigationEvent::Arrived)
        } else if off_route != self.off_route && !self.arrived {
            Some(if off_route { NavigationEvent::LeftRoute } else { NavigationEvent::RejoinedRoute })
        } else {
            None
        };

        self.off_route = off_route;
        self.active = true;
        self.consecutive_failures = 0;
        self.last_progress = Some(progress);

        NavigationUpdate::Moved { progress, event }
    }

    pub fn record_failure(&mut self, error: SensorError) -> NavigationUpdate {
        self.active = false;
        self.consecutive_failures += 1;

        NavigationUpdate::TrackingLost {
            error,
            failures: self.consecutive_failures,
        }
    }
}
