use std::fmt;

use campus_nav_lib::{
    coordinate::Coordinate, directions::Instruction, location_sample::LocationSample, route::RouteResult,
};
use serde::Serialize;
use thiserror::Error;

use crate::{route_client::RouteError, sampler::SensorError};

mod controller;
mod navigation;

pub use controller::RouteSessionController;
pub use navigation::{NavigationEvent, NavigationProgress, NavigationSession, NavigationUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Nothing selected.
    #[default]
    Idle,
    /// At least one endpoint chosen, no route yet.
    Selecting,
    /// A route request is in flight.
    Planning,
    RouteReady,
    Navigating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Selecting => write!(f, "selecting"),
            SessionState::Planning => write!(f, "planning"),
            SessionState::RouteReady => write!(f, "route ready"),
            SessionState::Navigating => write!(f, "navigating"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Endpoint {
    Start,
    End,
}

impl Endpoint {
    pub fn other(self) -> Self {
        match self {
            Endpoint::Start => Endpoint::End,
            Endpoint::End => Endpoint::Start,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Start => write!(f, "start"),
            Endpoint::End => write!(f, "destination"),
        }
    }
}

/// What the user picked for an endpoint, before it is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum PointChoice {
    Catalog(String),
    MapTap(Coordinate),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PointOrigin {
    Catalog(String),
    CurrentLocation,
    MapTap,
}

/// A resolved endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedPoint {
    pub origin: PointOrigin,
    pub label: String,
    pub coordinate: Coordinate,
}

impl SelectedPoint {
    pub fn catalog_id(&self) -> Option<&str> {
        match &self.origin {
            PointOrigin::Catalog(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_current_location(&self) -> bool {
        self.origin == PointOrigin::CurrentLocation
    }
}

/// Per-endpoint selector configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSelector {
    pub allow_current_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub start_selector: EndpointSelector,
    pub end_selector: EndpointSelector,
    /// Straight-line distance to the destination that counts as arrival.
    pub arrival_radius_m: f64,
    /// Distance from the route polyline that counts as off-route.
    pub deviation_threshold_m: f64,
    /// Consecutive tracking failures after which retries are refused.
    pub max_tracking_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            start_selector: EndpointSelector { allow_current_location: true },
            end_selector: EndpointSelector { allow_current_location: false },
            arrival_radius_m: 15.,
            deviation_threshold_m: 30.,
            max_tracking_failures: 3,
        }
    }
}

impl SessionSettings {
    pub fn selector(&self, endpoint: Endpoint) -> EndpointSelector {
        match endpoint {
            Endpoint::Start => self.start_selector,
            Endpoint::End => self.end_selector,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Tracking(#[from] SensorError),
    #[error("choose both a start and a destination first")]
    IncompleteSelection,
    #[error("a route request is already in progress")]
    RequestInFlight,
    #[error("cannot {action} while {state}")]
    NotPermitted { action: &'static str, state: SessionState },
    #[error("unknown location {0:?}")]
    UnknownLocation(String),
    #[error("start and destination must be different locations")]
    SameLocation,
    #[error("current location is not offered for the {0}")]
    CurrentLocationNotOffered(Endpoint),
    #[error("location tracking failed {0} times in a row")]
    TrackingGaveUp(u32),
    #[error("position sample from {0} is out of date")]
    StaleSample(i64),
}

impl SessionError {
    /// The short text shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Route(RouteError::RouteNotFound(message)) => format!("No route found: {message}"),
            SessionError::Route(RouteError::NetworkError(_)) => {
                "Could not reach the navigation server. Check your connection and try again.".to_owned()
            }
            SessionError::Route(RouteError::ServerError(status)) => {
                format!("The navigation server had a problem (HTTP {status}). Please try again.")
            }
            SessionError::Route(RouteError::InvalidResponse(_)) => {
                "The navigation server sent a response that could not be read.".to_owned()
            }
            SessionError::Tracking(error) => format!("{error}. Tracking has stopped; retry when ready."),
            SessionError::TrackingGaveUp(count) => {
                format!("Location tracking failed {count} times in a row. Stop navigation and try again later.")
            }
            other => {
                let mut message = other.to_string();
                if let Some(first) = message.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                message
            }
        }
    }
}

/// Everything a renderer needs, published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub start: Option<SelectedPoint>,
    pub end: Option<SelectedPoint>,
    pub route: Option<RouteResult>,
    pub instructions: Vec<Instruction>,
    pub position: Option<LocationSample>,
    pub progress: Option<NavigationProgress>,
    pub arrived: bool,
    pub tracking: bool,
    pub request_in_flight: bool,
    pub message: Option<String>,
}
