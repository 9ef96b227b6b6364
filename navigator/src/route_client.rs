use std::time::Duration;

use async_trait::async_trait;
use campus_nav_lib::{
    coordinate::Coordinate,
    route::{RouteEnvelope, RouteRequest, RouteResult},
};
use reqwest::header::ACCEPT;
use thiserror::Error;

use crate::Configuration;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("Could not reach the navigation server: {0}")]
    NetworkError(String),
    #[error("The navigation server returned an error (HTTP {0})")]
    ServerError(u16),
    #[error("The navigation server sent an unreadable response: {0}")]
    InvalidResponse(String),
    #[error("No route found: {0}")]
    RouteNotFound(String),
}

/// Anything that can compute a route between two points.
#[async_trait]
pub trait RouteService: Send + Sync {
    async fn compute_route(&self, start: Coordinate, end: Coordinate) -> Result<RouteResult, RouteError>;
}

/// HTTP client for `GET {base}/route`. One request per call, no retries.
#[derive(Debug, Clone)]
pub struct RouteClient {
    http: reqwest::Client,
    route_url: String,
}

impl RouteClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            route_url: format!("{}/route", base_url.trim_end_matches('/')),
        })
    }

    pub fn from_config(config: &Configuration) -> Result<Self, RouteError> {
        Self::new(&config.api_base_url, Duration::from_millis(config.request_timeout_ms))
    }

    pub fn route_url(&self) -> &str {
        &self.route_url
    }
}

#[async_trait]
impl RouteService for RouteClient {
    async fn compute_route(&self, start: Coordinate, end: Coordinate) -> Result<RouteResult, RouteError> {
        let request = RouteRequest::new(start, end);
        tracing::debug!("Requesting route {} -> {}", start, end);

        let response = self
            .http
            .get(&self.route_url)
            .header(ACCEPT, "application/json")
            .query(&request.query_pairs())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Route request failed: {}", e);
                RouteError::NetworkError(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Route request returned HTTP {}", status.as_u16());
            return Err(RouteError::ServerError(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RouteError::NetworkError(e.to_string()))?;

        let route = decode_route(&body)?;
        tracing::info!(
            "Route found: {:.0} m, {:.1} min, {} points",
            route.total_distance_m,
            route.estimated_time_minutes,
            route.path_coordinates.len()
        );

        Ok(route)
    }
}

/// Interprets a 2xx body. A parseable failure envelope is `RouteNotFound`,
/// never a transport error.
pub fn decode_route(body: &str) -> Result<RouteResult, RouteError> {
    let envelope: RouteEnvelope =
        serde_json::from_str(body).map_err(|e| RouteError::InvalidResponse(e.to_string()))?;

    if !envelope.success {
        let message = envelope.error.unwrap_or_else(|| "no route between these points".to_owned());
        tracing::info!("Backend found no route: {}", message);
        return Err(RouteError::RouteNotFound(message));
    }

    let wire = envelope
        .route
        .ok_or_else(|| RouteError::InvalidResponse("success without a route".to_owned()))?;

    RouteResult::try_from(wire).map_err(|e| RouteError::InvalidResponse(e.to_string()))
}
