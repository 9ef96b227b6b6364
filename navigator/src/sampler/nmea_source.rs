use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use campus_nav_lib::{coordinate::Coordinate, location_sample::LocationSample};
use chrono::{NaiveDate, Utc};
use futures::StreamExt;
use nmea::{
    sentences::{FixType, GgaData},
    ParseResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::{PositionSource, PositionStream, SensorError, TrackingOptions};

const KNOTS_TO_MPS: f64 = 0.514444;
/// Rough conversion from HDOP to a horizontal error in meters.
const UERE_M: f64 = 5.;

/// Turns a sentence stream into fixes. GGA carries position and time of
/// day; RMC supplies the date, speed and course used by the following fixes.
#[derive(Debug, Default, Clone)]
pub struct NmeaFixParser {
    date: Option<NaiveDate>,
    speed_mps: Option<f64>,
    course_deg: Option<f64>,
}

impl NmeaFixParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> Option<LocationSample> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match nmea::parse_str(line) {
            Ok(ParseResult::RMC(rmc)) => {
                self.date = rmc.fix_date.or(self.date);
                self.speed_mps = rmc.speed_over_ground.map(|knots| knots as f64 * KNOTS_TO_MPS);
                self.course_deg = rmc.true_course.map(f64::from);
                None
            }
            Ok(ParseResult::GGA(gga)) => self.fix_from_gga(gga),
            Ok(_) => None,
            Err(e) => {
                tracing::trace!("Skipping NMEA line {:?}: {:?}", line, e);
                None
            }
        }
    }

    fn fix_from_gga(&self, gga: GgaData) -> Option<LocationSample> {
        if matches!(gga.fix_type, None | Some(FixType::Invalid)) {
            return None;
        }

        let coordinate = Coordinate::new(gga.latitude?, gga.longitude?).ok()?;
        let date = self.date.unwrap_or_else(|| Utc::now().date_naive());
        let timestamp_ms = date.and_time(gga.fix_time?).and_utc().timestamp_millis();
        let accuracy_m = gga.hdop.map_or(UERE_M, |hdop| hdop as f64 * UERE_M);

        let mut sample = LocationSample::new(coordinate, accuracy_m, timestamp_ms);
        sample.speed_mps = self.speed_mps;
        sample.heading_deg = self.course_deg;
        Some(sample)
    }
}

/// Reads NMEA 0183 from a serial device or a recorded log.
#[derive(Debug, Clone)]
pub struct NmeaSource {
    path: PathBuf,
    paced: bool,
}

impl NmeaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: false,
        }
    }

    /// Waits between fixes as long as their timestamps are apart, for logs
    /// that would otherwise be read in one burst.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sensor_error(error: std::io::Error) -> SensorError {
    match error.kind() {
        ErrorKind::NotFound => SensorError::Unsupported,
        ErrorKind::PermissionDenied => SensorError::PermissionDenied,
        _ => SensorError::PositionUnavailable,
    }
}

#[async_trait]
impl PositionSource for NmeaSource {
    fn watch_position(&self, _options: &TrackingOptions) -> Result<PositionStream, SensorError> {
        let file = std::fs::File::open(&self.path).map_err(|e| {
            tracing::warn!("Failed to open NMEA source {:?}: {}", self.path, e);
            sensor_error(e)
        })?;

        let lines = BufReader::new(tokio::fs::File::from_std(file)).lines();
        let state = (lines, NmeaFixParser::new(), None::<i64>, self.paced);

        let stream = futures::stream::unfold(state, |(mut lines, mut parser, mut last_ms, paced)| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(sample) = parser.feed(&line) else {
                            continue;
                        };

                        if let (true, Some(last)) = (paced, last_ms) {
                            if sample.timestamp_ms > last {
                                tokio::time::sleep(Duration::from_millis((sample.timestamp_ms - last) as u64)).await;
                            }
                        }
                        last_ms = Some(sample.timestamp_ms);

                        return Some((Ok(sample), (lines, parser, last_ms, paced)));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::warn!("Reading NMEA failed: {}", e);
                        return Some((Err(sensor_error(e)), (lines, parser, last_ms, paced)));
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
