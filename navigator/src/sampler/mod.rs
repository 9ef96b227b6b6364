use std::{fmt, time::Duration};

use async_trait::async_trait;
use campus_nav_lib::location_sample::LocationSample;
use futures::{stream::BoxStream, StreamExt};
use serde::Deserialize;
use thiserror::Error;

mod gpx_replay;
mod location_sampler;
mod manual;
mod nmea_source;

pub use gpx_replay::{GpxReplaySource, ReplayError};
pub use location_sampler::LocationSampler;
pub use manual::ManualSource;
pub use nmea_source::{NmeaFixParser, NmeaSource};

/// Failures of the position capability, worded for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("Location permission was denied")]
    PermissionDenied,
    #[error("Your position is currently unavailable")]
    PositionUnavailable,
    #[error("Timed out waiting for a position fix")]
    Timeout,
    #[error("Location services are not supported on this device")]
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackingOptions {
    pub high_accuracy: bool,
    /// Longest wait for the next reading before reporting `Timeout`.
    pub timeout_ms: u64,
    /// Oldest cached fix that may stand in for a fresh one.
    pub max_sample_age_ms: u64,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            max_sample_age_ms: 5_000,
        }
    }
}

impl TrackingOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrackingState {
    #[default]
    Idle,
    Tracking,
}

/// Advisory only. The watch call itself is the real permission check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    #[default]
    Unknown,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
            PermissionState::Unknown => write!(f, "unknown"),
        }
    }
}

pub type PositionStream = BoxStream<'static, Result<LocationSample, SensorError>>;

/// A device capability that reports positions.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn query_permission(&self) -> PermissionState {
        PermissionState::Unknown
    }

    /// Opens a continuous subscription. Dropping the stream cancels it.
    fn watch_position(&self, options: &TrackingOptions) -> Result<PositionStream, SensorError>;

    /// A single fix, taken from a short-lived subscription.
    async fn current_position(&self, options: &TrackingOptions) -> Result<LocationSample, SensorError> {
        let mut stream = self.watch_position(options)?;
        match tokio::time::timeout(options.timeout(), stream.next()).await {
            Ok(Some(reading)) => reading,
            Ok(None) => Err(SensorError::PositionUnavailable),
            Err(_) => Err(SensorError::Timeout),
        }
    }
}

/// One reading tagged with the subscription that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SamplerEvent {
    pub epoch: u64,
    pub reading: Result<LocationSample, SensorError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplerUpdate {
    Sample(LocationSample),
    /// Tracking has stopped because of this error.
    Failed(SensorError),
}
