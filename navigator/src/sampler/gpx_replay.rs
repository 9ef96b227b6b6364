use std::{io::Read, path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use campus_nav_lib::{coordinate::Coordinate, location_sample::LocationSample};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use thiserror::Error;

use super::{PermissionState, PositionSource, PositionStream, SensorError, TrackingOptions};

/// Gap used for track points without a timestamp.
const SYNTHETIC_STEP_MS: i64 = 1000;
const DEFAULT_ACCURACY_M: f64 = 5.;
/// Below this the heading between two points is noise.
const MIN_HEADING_DISTANCE_M: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse gpx: {0}")]
    Parse(String),
    #[error("track point {index} is not a valid coordinate")]
    Coordinate { index: usize },
    #[error("the gpx file holds no track points")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ReplayPoint {
    coordinate: Coordinate,
    accuracy_m: f64,
    /// Track time relative to the first point.
    offset_ms: i64,
    heading_deg: Option<f64>,
    speed_mps: Option<f64>,
}

/// Replays a recorded GPX track as if it were a live receiver.
///
/// Sample timestamps keep the track's spacing (divided by the speed factor)
/// but are rebased to the moment the subscription opened.
#[derive(Debug, Clone)]
pub struct GpxReplaySource {
    points: Vec<ReplayPoint>,
    speed: f64,
}

impl GpxReplaySource {
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let file = std::fs::File::open(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, ReplayError> {
        let gpx = gpx::read(reader).map_err(|e| ReplayError::Parse(e.to_string()))?;

        let mut points: Vec<ReplayPoint> = Vec::new();
        let mut first_ms = None;
        let mut prev_ms = 0;

        let waypoints = gpx.tracks.into_iter().flat_map(|t| t.segments).flat_map(|s| s.points);
        for (index, waypoint) in waypoints.enumerate() {
            let coordinate =
                Coordinate::try_from(waypoint.point()).map_err(|_| ReplayError::Coordinate { index })?;

            let recorded = waypoint
                .time
                .and_then(|t| t.format().ok())
                .and_then(|t| DateTime::<Utc>::from_str(&t).ok())
                .map(|t| t.timestamp_millis());

            // Keep time strictly increasing even for sloppy recordings
            let absolute_ms = match (recorded, first_ms) {
                (Some(t), None) => t,
                (Some(t), Some(_)) => t.max(prev_ms + 1),
                (None, None) => 0,
                (None, Some(_)) => prev_ms + SYNTHETIC_STEP_MS,
            };
            let first = *first_ms.get_or_insert(absolute_ms);

            let (heading_deg, speed_mps) = match points.last() {
                Some(prev) => {
                    let distance = prev.coordinate.distance_to(&coordinate);
                    let seconds = (absolute_ms - prev_ms) as f64 / 1000.;
                    let heading = (distance >= MIN_HEADING_DISTANCE_M).then(|| prev.coordinate.bearing_to(&coordinate));
                    (heading, Some(distance / seconds))
                }
                None => (None, None),
            };

            points.push(ReplayPoint {
                coordinate,
                accuracy_m: waypoint.hdop.map_or(DEFAULT_ACCURACY_M, |hdop| hdop * DEFAULT_ACCURACY_M),
                offset_ms: absolute_ms - first,
                heading_deg,
                speed_mps,
            });
            prev_ms = absolute_ms;
        }

        if points.is_empty() {
            return Err(ReplayError::Empty);
        }

        tracing::debug!("Loaded {} track points for replay", points.len());
        Ok(Self { points, speed: 1. })
    }

    /// Replays `factor` times faster than recorded.
    pub fn with_speed(mut self, factor: f64) -> Self {
        if factor > 0. && factor.is_finite() {
            self.speed = factor;
        } else {
            tracing::warn!("Ignoring replay speed {}", factor);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Track duration at the configured speed.
    pub fn duration(&self) -> Duration {
        let last = self.points.last().map_or(0, |p| p.offset_ms);
        Duration::from_millis(self.scaled(last) as u64)
    }

    fn scaled(&self, offset_ms: i64) -> i64 {
        (offset_ms as f64 / self.speed).round() as i64
    }
}

#[async_trait]
impl PositionSource for GpxReplaySource {
    async fn query_permission(&self) -> PermissionState {
        PermissionState::Granted
    }

    fn watch_position(&self, _options: &TrackingOptions) -> Result<PositionStream, SensorError> {
        let base_ms = Utc::now().timestamp_millis();
        let start = (self.clone(), 0usize, 0i64, base_ms - 1);
        let stream = futures::stream::unfold(start, move |(replay, index, elapsed_ms, last_stamp)| async move {
            let point = *replay.points.get(index)?;
            let due_ms = replay.scaled(point.offset_ms);
            if due_ms > elapsed_ms {
                tokio::time::sleep(Duration::from_millis((due_ms - elapsed_ms) as u64)).await;
            }

            // Fast replays can round neighbours onto the same millisecond
            let stamp = (base_ms + due_ms).max(last_stamp + 1);
            let mut sample = LocationSample::new(point.coordinate, point.accuracy_m, stamp);
            sample.heading_deg = point.heading_deg;
            sample.speed_mps = point.speed_mps;

            Some((Ok(sample), (replay, index + 1, due_ms.max(elapsed_ms), stamp)))
        });

        Ok(stream.boxed())
    }
}
