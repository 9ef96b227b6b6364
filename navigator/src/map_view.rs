use std::{
    io::Write,
    path::{Path, PathBuf},
};

use campus_nav_lib::{coordinate::Coordinate, directions::format_distance};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;
use thiserror::Error;

use crate::session::{Endpoint, SessionSnapshot, SessionState};

/// Input coming back from the map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapIntent {
    SetPoint { endpoint: Endpoint, coordinate: Coordinate },
    ClearPoint(Endpoint),
}

#[derive(Debug, Error)]
pub enum MapViewError {
    #[error("failed to write map output: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode map output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A render target for session state.
pub trait MapView {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Result<(), MapViewError>;
}

pub fn format_duration(minutes: f64) -> String {
    let total = minutes.max(0.).round() as u64;
    format!("{:02}h {:02}m", total / 60, total % 60)
}

/// Plain text to any writer, printing only what changed since the last render.
pub struct TerminalMapView<W: Write> {
    out: W,
    last_state: Option<SessionState>,
    route_shown: bool,
    last_progress_ms: Option<i64>,
    last_message: Option<String>,
}

impl<W: Write> TerminalMapView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_state: None,
            route_shown: false,
            last_progress_ms: None,
            last_message: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MapView for TerminalMapView<W> {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Result<(), MapViewError> {
        if self.last_state != Some(snapshot.state) {
            writeln!(self.out, "[{}]", snapshot.state)?;
            self.last_state = Some(snapshot.state);
        }

        match &snapshot.route {
            Some(route) if !self.route_shown => {
                let from = snapshot.start.as_ref().map_or("start", |p| p.label.as_str());
                let to = snapshot.end.as_ref().map_or("destination", |p| p.label.as_str());
                writeln!(self.out, "Route from {} to {}", from, to)?;
                writeln!(
                    self.out,
                    "  {}, {} walking",
                    format_distance(route.total_distance_m),
                    format_duration(route.estimated_time_minutes)
                )?;
                for (i, instruction) in snapshot.instructions.iter().enumerate() {
                    writeln!(self.out, "  {:>2}. {}", i + 1, instruction.text)?;
                }
                self.route_shown = true;
            }
            Some(_) => {}
            None => self.route_shown = false,
        }

        if let Some(progress) = &snapshot.progress {
            if self.last_progress_ms != Some(progress.timestamp_ms) {
                let next = progress
                    .next_instruction
                    .and_then(|i| snapshot.instructions.get(i))
                    .map_or(String::new(), |instruction| {
                        let distance = progress.distance_to_next_m.map_or(String::new(), format_distance);
                        format!(", next in {}: {}", distance, instruction.text)
                    });
                writeln!(
                    self.out,
                    "  at {} (±{:.0} m): {} to go, {} straight line{}",
                    progress.position,
                    progress.accuracy_m,
                    format_distance(progress.remaining_route_m),
                    format_distance(progress.distance_to_destination_m),
                    next
                )?;
                self.last_progress_ms = Some(progress.timestamp_ms);
            }
        }

        if snapshot.message != self.last_message {
            if let Some(message) = &snapshot.message {
                writeln!(self.out, "! {}", message)?;
            }
            self.last_message = snapshot.message.clone();
        }

        self.out.flush()?;
        Ok(())
    }
}

/// Writes the route, endpoints and live position as a GeoJSON
/// FeatureCollection, replacing the file on every render.
pub struct GeoJsonMapView {
    path: PathBuf,
}

impl GeoJsonMapView {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MapView for GeoJsonMapView {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Result<(), MapViewError> {
        let json = serde_json::to_string_pretty(&feature_collection(snapshot))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

fn position(coordinate: Coordinate) -> Vec<f64> {
    vec![coordinate.lng(), coordinate.lat()]
}

fn feature(value: Value, properties: serde_json::Value) -> Feature {
    let properties: Option<JsonObject> = match properties {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    };

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties,
        foreign_members: None,
    }
}

pub fn feature_collection(snapshot: &SessionSnapshot) -> FeatureCollection {
    let mut features = Vec::new();

    if let Some(route) = &snapshot.route {
        features.push(feature(
            Value::LineString(route.path_coordinates.iter().copied().map(position).collect()),
            json!({
                "kind": "route",
                "distance_m": route.total_distance_m,
                "estimated_time_minutes": route.estimated_time_minutes,
            }),
        ));
    }

    for (kind, point) in [("start", &snapshot.start), ("end", &snapshot.end)] {
        if let Some(point) = point {
            features.push(feature(
                Value::Point(position(point.coordinate)),
                json!({ "kind": kind, "label": point.label }),
            ));
        }
    }

    if let Some(sample) = &snapshot.position {
        features.push(feature(
            Value::Point(position(sample.coordinate)),
            json!({
                "kind": "position",
                "accuracy_m": sample.accuracy_m,
                "heading_deg": sample.heading_deg,
                "arrived": snapshot.arrived,
            }),
        ));
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PointOrigin, SelectedPoint};
    use campus_nav_lib::{directions::generate_instructions, route::RouteResult};
    use rstest::rstest;

    fn c(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    fn ready_snapshot() -> SessionSnapshot {
        let path = vec![c(28.525237, 77.570965), c(28.5254, 77.573), c(28.525503, 77.575042)];
        SessionSnapshot {
            state: SessionState::RouteReady,
            start: Some(SelectedPoint {
                origin: PointOrigin::Catalog("library".into()),
                label: "Central Library".into(),
                coordinate: path[0],
            }),
            end: Some(SelectedPoint {
                origin: PointOrigin::Catalog("hostel".into()),
                label: "Boys Hostel".into(),
                coordinate: path[2],
            }),
            instructions: generate_instructions(&path),
            route: Some(RouteResult {
                start: path[0],
                end: path[2],
                path_coordinates: path,
                total_distance_m: 500.,
                estimated_time_minutes: 6.,
            }),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(6., "00h 06m")]
    #[case(75.4, "01h 15m")]
    #[case(-3., "00h 00m")]
    fn durations(#[case] minutes: f64, #[case] expected: &str) {
        assert_eq!(format_duration(minutes), expected);
    }

    #[test]
    fn terminal_prints_route_once() {
        let mut view = TerminalMapView::new(Vec::new());
        let snapshot = ready_snapshot();
        view.render(&snapshot).unwrap();
        view.render(&snapshot).unwrap();

        let text = String::from_utf8(view.into_inner()).unwrap();
        assert_eq!(text.matches("Route from Central Library to Boys Hostel").count(), 1);
        assert!(text.contains("[route ready]"));
        assert!(text.contains("500 m, 00h 06m walking"));
        assert!(text.contains("arrive at your destination"));
    }

    #[test]
    fn terminal_shows_messages() {
        let mut view = TerminalMapView::new(Vec::new());
        let snapshot = SessionSnapshot {
            state: SessionState::Selecting,
            message: Some("No route found: Points are not connected".into()),
            ..Default::default()
        };
        view.render(&snapshot).unwrap();

        let text = String::from_utf8(view.into_inner()).unwrap();
        assert!(text.contains("[selecting]"));
        assert!(text.contains("! No route found"));
    }

    #[test]
    fn geojson_features() {
        let collection = feature_collection(&ready_snapshot());
        assert_eq!(collection.features.len(), 3);

        let route = &collection.features[0];
        assert_eq!(route.property("kind"), Some(&json!("route")));
        match &route.geometry.as_ref().unwrap().value {
            Value::LineString(line) => {
                assert_eq!(line.len(), 3);
                // GeoJSON positions are lng, lat
                assert_eq!(line[0], vec![77.570965, 28.525237]);
            }
            other => panic!("unexpected geometry {other:?}"),
        }

        assert_eq!(collection.features[2].property("label"), Some(&json!("Boys Hostel")));
        assert!(feature_collection(&SessionSnapshot::default()).features.is_empty());
    }

    #[test]
    fn geojson_is_written_to_disk() {
        let path = std::env::temp_dir().join(format!("campus-nav-{}.geojson", std::process::id()));
        let mut view = GeoJsonMapView::new(&path);
        view.render(&ready_snapshot()).unwrap();

        let written = std::fs::read_to_string(&path).unwrap().parse::<geojson::GeoJson>().unwrap();
        std::fs::remove_file(&path).unwrap();
        match written {
            geojson::GeoJson::FeatureCollection(collection) => assert_eq!(collection.features.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }
}
