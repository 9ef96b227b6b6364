use campus_nav_lib::{
    directions::{self, Instruction},
    location::{LocationCatalog, NamedLocation},
    location_sample::LocationSample,
    route::{RouteRequest, RouteResult},
};
use chrono::Utc;
use tokio::sync::watch;

use crate::{
    map_view::MapIntent,
    route_client::{RouteError, RouteService},
    sampler::{LocationSampler, SamplerUpdate, SensorError},
};

use super::{
    navigation::{NavigationEvent, NavigationSession, NavigationUpdate},
    Endpoint, PointChoice, PointOrigin, SelectedPoint, SessionError, SessionSettings, SessionSnapshot, SessionState,
};

const CURRENT_LOCATION_LABEL: &str = "Current location";

/// Owns the planning and navigation session.
///
/// All mutation goes through the methods below; after each one the new
/// [`SessionSnapshot`] is published to subscribers. The controller is the
/// only user of its [`LocationSampler`].
pub struct RouteSessionController<R: RouteService> {
    catalog: LocationCatalog,
    routes: R,
    sampler: LocationSampler,
    settings: SessionSettings,

    state: SessionState,
    start: Option<SelectedPoint>,
    end: Option<SelectedPoint>,
    route: Option<RouteResult>,
    instructions: Vec<Instruction>,
    navigation: Option<NavigationSession>,
    latest: Option<LocationSample>,
    message: Option<String>,

    snapshots: watch::Sender<SessionSnapshot>,
}

impl<R: RouteService> RouteSessionController<R> {
    pub fn new(catalog: LocationCatalog, routes: R, sampler: LocationSampler, settings: SessionSettings) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());

        Self {
            catalog,
            routes,
            sampler,
            settings,
            state: SessionState::Idle,
            start: None,
            end: None,
            route: None,
            instructions: Vec::new(),
            navigation: None,
            latest: None,
            message: None,
            snapshots,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selection(&self, endpoint: Endpoint) -> Option<&SelectedPoint> {
        match endpoint {
            Endpoint::Start => self.start.as_ref(),
            Endpoint::End => self.end.as_ref(),
        }
    }

    pub fn route(&self) -> Option<&RouteResult> {
        self.route.as_ref()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn navigation(&self) -> Option<&NavigationSession> {
        self.navigation.as_ref()
    }

    pub fn latest_sample(&self) -> Option<&LocationSample> {
        self.latest.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn sampler(&self) -> &LocationSampler {
        &self.sampler
    }

    pub fn catalog(&self) -> &LocationCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            start: self.start.clone(),
            end: self.end.clone(),
            route: self.route.clone(),
            instructions: self.instructions.clone(),
            position: self.latest,
            progress: self.navigation.as_ref().and_then(|n| n.last_progress),
            arrived: self.navigation.as_ref().is_some_and(|n| n.arrived),
            tracking: self.sampler.is_tracking(),
            request_in_flight: self.state == SessionState::Planning,
            message: self.message.clone(),
        }
    }

    // Selection

    /// Catalog points offered to `endpoint`; the other endpoint's point is left out.
    pub fn offered_locations(&self, endpoint: Endpoint) -> Vec<&NamedLocation> {
        let taken = self.selection(endpoint.other()).and_then(SelectedPoint::catalog_id);
        self.catalog.offered_excluding(taken).collect()
    }

    pub fn offers_current_location(&self, endpoint: Endpoint) -> bool {
        self.settings.selector(endpoint).allow_current_location
            && !self.selection(endpoint.other()).is_some_and(SelectedPoint::is_current_location)
    }

    pub fn select(&mut self, endpoint: Endpoint, choice: PointChoice) -> Result<(), SessionError> {
        self.ensure_editable("change the selection")?;

        let point = match choice {
            PointChoice::Catalog(id) => {
                let Some(location) = self.catalog.get(&id) else {
                    return Err(self.reject(SessionError::UnknownLocation(id)));
                };
                let taken = self.selection(endpoint.other()).and_then(SelectedPoint::catalog_id);
                if taken == Some(id.as_str()) {
                    return Err(self.reject(SessionError::SameLocation));
                }

                SelectedPoint {
                    label: location.name.clone(),
                    coordinate: location.coordinate,
                    origin: PointOrigin::Catalog(id),
                }
            }
            PointChoice::MapTap(coordinate) => SelectedPoint {
                origin: PointOrigin::MapTap,
                label: format!("Map point {coordinate}"),
                coordinate,
            },
        };

        tracing::debug!("Selected {} for the {}", point.label, endpoint);
        self.set_point(endpoint, Some(point));
        Ok(())
    }

    /// Resolves `endpoint` to the device's position, reusing the latest
    /// sample when it is fresh enough.
    pub async fn use_current_location(&mut self, endpoint: Endpoint) -> Result<(), SessionError> {
        self.ensure_editable("change the selection")?;

        if !self.settings.selector(endpoint).allow_current_location {
            return Err(self.reject(SessionError::CurrentLocationNotOffered(endpoint)));
        }
        if self.selection(endpoint.other()).is_some_and(SelectedPoint::is_current_location) {
            return Err(self.reject(SessionError::SameLocation));
        }

        let max_age = self.sampler.options().max_sample_age_ms as i64;
        let fresh = self.latest.filter(|s| s.age_ms(Utc::now()) <= max_age);

        let sample = match fresh {
            Some(sample) => sample,
            None => match self.sampler.current_position().await {
                Ok(sample) => sample,
                Err(error) => return Err(self.reject(error.into())),
            },
        };

        self.set_point(
            endpoint,
            Some(SelectedPoint {
                origin: PointOrigin::CurrentLocation,
                label: CURRENT_LOCATION_LABEL.to_owned(),
                coordinate: sample.coordinate,
            }),
        );
        Ok(())
    }

    pub fn clear_selection(&mut self, endpoint: Endpoint) -> Result<(), SessionError> {
        self.ensure_editable("change the selection")?;
        self.set_point(endpoint, None);
        Ok(())
    }

    /// Exchanges the endpoints. Swapping twice restores the original selection.
    pub fn swap(&mut self) -> Result<(), SessionError> {
        self.ensure_editable("swap")?;

        if self.start.is_none() || self.end.is_none() {
            return Err(self.reject(SessionError::IncompleteSelection));
        }
        for endpoint in [Endpoint::Start, Endpoint::End] {
            let incoming = self.selection(endpoint.other()).is_some_and(SelectedPoint::is_current_location);
            if incoming && !self.settings.selector(endpoint).allow_current_location {
                return Err(self.reject(SessionError::CurrentLocationNotOffered(endpoint)));
            }
        }

        std::mem::swap(&mut self.start, &mut self.end);
        self.discard_route();
        self.message = None;
        self.settle();
        Ok(())
    }

    pub fn apply_intent(&mut self, intent: MapIntent) -> Result<(), SessionError> {
        match intent {
            MapIntent::SetPoint { endpoint, coordinate } => self.select(endpoint, PointChoice::MapTap(coordinate)),
            MapIntent::ClearPoint(endpoint) => self.clear_selection(endpoint),
        }
    }

    // Planning

    /// Moves to `Planning` and hands out the request to run. Fails while
    /// another request is in flight.
    pub fn begin_submit(&mut self) -> Result<RouteRequest, SessionError> {
        self.ensure_editable("request a route")?;

        let request = match (&self.start, &self.end) {
            (Some(start), Some(end)) => RouteRequest::new(start.coordinate, end.coordinate),
            _ => return Err(self.reject(SessionError::IncompleteSelection)),
        };

        self.discard_route();
        self.message = None;
        self.set_state(SessionState::Planning);
        self.publish();

        Ok(request)
    }

    pub fn complete_submit(&mut self, outcome: Result<RouteResult, RouteError>) -> Result<(), SessionError> {
        if self.state != SessionState::Planning {
            let state = self.state;
            return Err(self.reject(SessionError::NotPermitted {
                action: "complete a route request",
                state,
            }));
        }

        match outcome {
            Ok(route) => {
                self.instructions = directions::generate_instructions(&route.path_coordinates);
                self.route = Some(route);
                self.message = None;
                self.set_state(SessionState::RouteReady);
                self.publish();
                Ok(())
            }
            Err(error) => {
                self.discard_route();
                self.set_state(SessionState::Selecting);
                Err(self.reject(error.into()))
            }
        }
    }

    /// Requests a route for the current selection and waits for it.
    pub async fn submit(&mut self) -> Result<(), SessionError> {
        let request = self.begin_submit()?;
        let outcome = self.routes.compute_route(request.start, request.end).await;
        self.complete_submit(outcome)
    }

    // Navigation

    pub fn start_navigation(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::RouteReady {
            let state = self.state;
            return Err(self.reject(SessionError::NotPermitted {
                action: "start navigation",
                state,
            }));
        }
        let Some(route) = &self.route else {
            return Err(self.reject(SessionError::IncompleteSelection));
        };
        let label = self.end.as_ref().map_or("destination", |p| p.label.as_str());
        let session = NavigationSession::new(route, &self.instructions, label);

        if let Err(error) = self.sampler.start_tracking() {
            return Err(self.reject(error.into()));
        }

        tracing::info!("Navigating to {}", session.destination_label);
        // Sample ordering restarts with every run
        self.latest = None;
        self.navigation = Some(session);
        self.message = None;
        self.set_state(SessionState::Navigating);
        self.publish();
        Ok(())
    }

    /// Ends navigation and tracking. Does nothing outside navigation.
    pub fn stop_navigation(&mut self) {
        self.sampler.stop_tracking();
        if self.state != SessionState::Navigating {
            return;
        }

        self.navigation = None;
        self.message = None;
        self.set_state(SessionState::RouteReady);
        self.publish();
    }

    /// The explicit user retry after a tracking failure.
    pub fn retry_tracking(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Navigating {
            let state = self.state;
            return Err(self.reject(SessionError::NotPermitted {
                action: "retry tracking",
                state,
            }));
        }
        if self.sampler.is_tracking() {
            return Ok(());
        }

        let failures = self.navigation.as_ref().map_or(0, |n| n.consecutive_failures);
        if failures >= self.settings.max_tracking_failures {
            return Err(self.reject(SessionError::TrackingGaveUp(failures)));
        }

        match self.sampler.start_tracking() {
            Ok(()) => {
                tracing::info!("Tracking resumed after {} failure(s)", failures);
                if let Some(navigation) = self.navigation.as_mut() {
                    navigation.active = true;
                }
                self.message = None;
                self.publish();
                Ok(())
            }
            Err(error) => {
                self.handle_tracking_error(error);
                Err(error.into())
            }
        }
    }

    /// Waits for the next position update while navigating. Stale and
    /// out-of-order samples are skipped.
    pub async fn next_update(&mut self) -> Option<NavigationUpdate> {
        loop {
            if self.state != SessionState::Navigating {
                return None;
            }

            match self.sampler.next_update().await? {
                SamplerUpdate::Sample(sample) => {
                    if let Ok(update) = self.handle_sample(sample) {
                        return Some(update);
                    }
                }
                SamplerUpdate::Failed(error) => return self.handle_tracking_error(error),
            }
        }
    }

    /// Applies one live sample. Only the newest sample is kept, and a sample
    /// not newer than it is rejected.
    pub fn handle_sample(&mut self, sample: LocationSample) -> Result<NavigationUpdate, SessionError> {
        if self.state != SessionState::Navigating {
            return Err(SessionError::NotPermitted {
                action: "follow a position",
                state: self.state,
            });
        }
        if !self.sampler.is_tracking() {
            tracing::debug!("Dropping sample at {} received while not tracking", sample.timestamp_ms);
            return Err(SessionError::StaleSample(sample.timestamp_ms));
        }
        if let Some(latest) = self.latest {
            if sample.timestamp_ms <= latest.timestamp_ms {
                tracing::debug!(
                    "Dropping out-of-order sample {} (latest {})",
                    sample.timestamp_ms,
                    latest.timestamp_ms
                );
                return Err(SessionError::StaleSample(sample.timestamp_ms));
            }
        }
        let Some(navigation) = self.navigation.as_mut() else {
            return Err(SessionError::IncompleteSelection);
        };

        let update = navigation.advance(&sample, &self.settings);
        let (arrived, off_route) = (navigation.arrived, navigation.off_route);
        let label = navigation.destination_label.clone();

        if let NavigationUpdate::Moved { event: Some(event), progress } = update {
            match event {
                NavigationEvent::Arrived => tracing::info!("Arrived at {}", label),
                NavigationEvent::LeftRoute => {
                    tracing::info!("Left the route by {:.0} m", progress.off_route_m)
                }
                NavigationEvent::RejoinedRoute => tracing::info!("Back on the route"),
            }
        }

        self.latest = Some(sample);
        self.message = if arrived {
            Some(format!("You have arrived at {label}."))
        } else if off_route {
            Some("You have left the route. Head back to the highlighted path.".to_owned())
        } else {
            None
        };
        self.publish();

        Ok(update)
    }

    /// Surfaces a tracking failure. Navigation continues; the subscription
    /// is torn down and waits for [`retry_tracking`](Self::retry_tracking).
    pub fn handle_tracking_error(&mut self, error: SensorError) -> Option<NavigationUpdate> {
        self.sampler.stop_tracking();

        let navigation = match (self.state, self.navigation.as_mut()) {
            (SessionState::Navigating, Some(navigation)) => navigation,
            _ => {
                tracing::debug!("Ignoring tracking error outside navigation: {}", error);
                return None;
            }
        };

        let update = navigation.record_failure(error);
        let failures = navigation.consecutive_failures;

        let surfaced = if failures >= self.settings.max_tracking_failures {
            SessionError::TrackingGaveUp(failures)
        } else {
            SessionError::Tracking(error)
        };
        self.reject(surfaced);

        Some(update)
    }

    /// Back to `Idle` from anywhere.
    pub fn reset(&mut self) {
        self.sampler.stop_tracking();
        self.navigation = None;
        self.start = None;
        self.end = None;
        self.latest = None;
        self.discard_route();
        self.message = None;
        self.set_state(SessionState::Idle);
        self.publish();
    }

    // Helpers

    fn ensure_editable(&mut self, action: &'static str) -> Result<(), SessionError> {
        match self.state {
            SessionState::Planning => Err(self.reject(SessionError::RequestInFlight)),
            SessionState::Navigating => Err(self.reject(SessionError::NotPermitted {
                action,
                state: SessionState::Navigating,
            })),
            _ => Ok(()),
        }
    }

    fn set_point(&mut self, endpoint: Endpoint, point: Option<SelectedPoint>) {
        match endpoint {
            Endpoint::Start => self.start = point,
            Endpoint::End => self.end = point,
        }
        // A route for the old endpoints would be misleading
        self.discard_route();
        self.message = None;
        self.settle();
    }

    fn discard_route(&mut self) {
        self.route = None;
        self.instructions.clear();
    }

    /// Picks the resting state for the current selection and publishes it.
    fn settle(&mut self) {
        let state = if self.start.is_none() && self.end.is_none() {
            SessionState::Idle
        } else {
            SessionState::Selecting
        };
        self.set_state(state);
        self.publish();
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!("Session {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn reject(&mut self, error: SessionError) -> SessionError {
        tracing::warn!("{}", error);
        self.message = Some(error.user_message());
        self.publish();
        error
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use campus_nav_lib::coordinate::Coordinate;

    use super::*;
    use crate::sampler::{ManualSource, TrackingOptions};

    const CATALOG: &str = r#"{
        "categories": ["Academic", "Residential"],
        "locations": [
            {"id": "library", "name": "Central Library", "category": "Academic", "lat": 28.525237, "lng": 77.570965},
            {"id": "hostel", "name": "Boys Hostel", "category": "Residential", "lat": 28.525503, "lng": 77.575042},
            {"id": "block-a", "name": "Academic Block A", "category": "Academic", "lat": 28.5260, "lng": 77.5720}
        ]
    }"#;

    /// Answers from a fixed outcome and counts calls.
    struct FixedRoutes {
        outcome: Result<RouteResult, RouteError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteService for FixedRoutes {
        async fn compute_route(&self, _start: Coordinate, _end: Coordinate) -> Result<RouteResult, RouteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn c(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng).unwrap()
    }

    fn route() -> RouteResult {
        RouteResult {
            start: c(28.525237, 77.570965),
            end: c(28.525503, 77.575042),
            path_coordinates: vec![c(28.525237, 77.570965), c(28.525503, 77.575042)],
            total_distance_m: 500.,
            estimated_time_minutes: 6.,
        }
    }

    async fn controller(
        outcome: Result<RouteResult, RouteError>,
    ) -> (RouteSessionController<FixedRoutes>, Arc<ManualSource>) {
        let source = Arc::new(ManualSource::new());
        let sampler = LocationSampler::initialize(Some(source.clone()), TrackingOptions::default()).await;
        let routes = FixedRoutes {
            outcome,
            calls: AtomicUsize::new(0),
        };
        let catalog = LocationCatalog::from_json(CATALOG).unwrap();
        (RouteSessionController::new(catalog, routes, sampler, SessionSettings::default()), source)
    }

    fn pick(controller: &mut RouteSessionController<FixedRoutes>, start: &str, end: &str) {
        controller.select(Endpoint::Start, PointChoice::Catalog(start.into())).unwrap();
        controller.select(Endpoint::End, PointChoice::Catalog(end.into())).unwrap();
    }

    #[tokio::test]
    async fn selection_moves_to_selecting() {
        let (mut controller, _) = controller(Ok(route())).await;
        assert_eq!(controller.state(), SessionState::Idle);

        controller.select(Endpoint::Start, PointChoice::Catalog("library".into())).unwrap();
        assert_eq!(controller.state(), SessionState::Selecting);

        controller.clear_selection(Endpoint::Start).unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn chosen_point_is_not_offered_to_the_other_endpoint() {
        let (mut controller, _) = controller(Ok(route())).await;
        controller.select(Endpoint::Start, PointChoice::Catalog("library".into())).unwrap();

        let offered: Vec<_> = controller.offered_locations(Endpoint::End).iter().map(|l| l.id.as_str()).collect();
        assert_eq!(offered, ["hostel", "block-a"]);
        assert_eq!(controller.offered_locations(Endpoint::Start).len(), 3);

        let err = controller.select(Endpoint::End, PointChoice::Catalog("library".into())).unwrap_err();
        assert_eq!(err, SessionError::SameLocation);
        assert!(controller.message().is_some());
    }

    #[tokio::test]
    async fn unknown_location_is_rejected() {
        let (mut controller, _) = controller(Ok(route())).await;
        let err = controller.select(Endpoint::Start, PointChoice::Catalog("gym".into())).unwrap_err();
        assert_eq!(err, SessionError::UnknownLocation("gym".into()));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn submit_requires_both_endpoints() {
        let (mut controller, _) = controller(Ok(route())).await;
        controller.select(Endpoint::Start, PointChoice::Catalog("library".into())).unwrap();
        assert_eq!(controller.submit().await, Err(SessionError::IncompleteSelection));
        assert_eq!(controller.routes.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_submit_is_route_ready() {
        let (mut controller, _) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");

        controller.submit().await.unwrap();
        assert_eq!(controller.state(), SessionState::RouteReady);
        assert_eq!(controller.route(), Some(&route()));
        assert_eq!(controller.instructions().len(), 2);
    }

    #[tokio::test]
    async fn failed_submit_discards_previous_route() {
        let (mut controller, _) = controller(Err(RouteError::ServerError(500))).await;
        pick(&mut controller, "library", "hostel");

        controller.begin_submit().unwrap();
        controller.complete_submit(Ok(route())).unwrap();
        assert!(controller.route().is_some());

        let err = controller.submit().await.unwrap_err();
        assert_eq!(err, SessionError::Route(RouteError::ServerError(500)));
        assert_eq!(controller.state(), SessionState::Selecting);
        assert!(controller.route().is_none());
        assert!(controller.message().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn no_second_request_while_planning() {
        let (mut controller, _) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");

        controller.begin_submit().unwrap();
        assert!(controller.snapshot().request_in_flight);
        assert_eq!(controller.begin_submit(), Err(SessionError::RequestInFlight));
        assert_eq!(controller.swap(), Err(SessionError::RequestInFlight));
        assert!(controller.select(Endpoint::End, PointChoice::Catalog("block-a".into())).is_err());

        controller.complete_submit(Ok(route())).unwrap();
        assert_eq!(controller.state(), SessionState::RouteReady);
    }

    #[tokio::test]
    async fn selection_change_invalidates_route() {
        let (mut controller, _) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();

        let tap = MapIntent::SetPoint {
            endpoint: Endpoint::End,
            coordinate: c(28.5262, 77.5731),
        };
        controller.apply_intent(tap).unwrap();
        assert_eq!(controller.state(), SessionState::Selecting);
        assert!(controller.route().is_none());
        assert_eq!(controller.selection(Endpoint::End).unwrap().origin, PointOrigin::MapTap);
    }

    #[tokio::test]
    async fn current_location_only_where_offered() {
        let (mut controller, source) = controller(Ok(route())).await;
        source.push_sample(LocationSample::new(c(28.5251, 77.5711), 4., Utc::now().timestamp_millis()));

        assert!(!controller.offers_current_location(Endpoint::End));
        assert_eq!(
            controller.use_current_location(Endpoint::End).await,
            Err(SessionError::CurrentLocationNotOffered(Endpoint::End))
        );

        controller.use_current_location(Endpoint::Start).await.unwrap();
        let start = controller.selection(Endpoint::Start).unwrap();
        assert!(start.is_current_location());
        assert_eq!(start.coordinate, c(28.5251, 77.5711));

        // The start holds current location, so swapping would put it on the destination
        controller.select(Endpoint::End, PointChoice::Catalog("hostel".into())).unwrap();
        assert_eq!(controller.swap(), Err(SessionError::CurrentLocationNotOffered(Endpoint::End)));
    }

    #[tokio::test]
    async fn current_location_without_fix_fails() {
        let (mut controller, _) = controller(Ok(route())).await;
        assert_eq!(
            controller.use_current_location(Endpoint::Start).await,
            Err(SessionError::Tracking(SensorError::PositionUnavailable))
        );
        assert!(controller.selection(Endpoint::Start).is_none());
    }

    #[tokio::test]
    async fn navigation_only_from_route_ready() {
        let (mut controller, _) = controller(Ok(route())).await;
        assert!(matches!(controller.start_navigation(), Err(SessionError::NotPermitted { .. })));

        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();
        controller.start_navigation().unwrap();
        assert_eq!(controller.state(), SessionState::Navigating);
        assert!(controller.sampler().is_tracking());
        assert_eq!(controller.navigation().unwrap().destination, route().end);

        assert!(controller.swap().is_err());
        controller.stop_navigation();
        controller.stop_navigation();
        assert_eq!(controller.state(), SessionState::RouteReady);
        assert!(!controller.sampler().is_tracking());
        assert!(controller.navigation().is_none());
    }

    #[tokio::test]
    async fn restarted_navigation_accepts_earlier_timestamps() {
        let (mut controller, _) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();

        controller.start_navigation().unwrap();
        controller.handle_sample(LocationSample::new(c(28.5253, 77.5720), 5., 1000)).unwrap();
        controller.stop_navigation();

        // A replayed log starts over with its first fix
        controller.start_navigation().unwrap();
        assert!(controller.latest_sample().is_none());
        controller.handle_sample(LocationSample::new(c(28.5253, 77.5715), 5., 500)).unwrap();
        assert_eq!(controller.latest_sample().unwrap().timestamp_ms, 500);
        assert_eq!(
            controller.handle_sample(LocationSample::new(c(28.5253, 77.5716), 5., 500)),
            Err(SessionError::StaleSample(500))
        );
    }

    #[tokio::test]
    async fn refused_tracking_keeps_route_ready() {
        let (mut controller, source) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();

        source.refuse_next_watch(SensorError::PermissionDenied);
        assert_eq!(controller.start_navigation(), Err(SessionError::Tracking(SensorError::PermissionDenied)));
        assert_eq!(controller.state(), SessionState::RouteReady);
        assert!(controller.navigation().is_none());
    }

    #[tokio::test]
    async fn retries_are_refused_after_repeated_failures() {
        let (mut controller, _) = controller(Ok(route())).await;
        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();
        controller.start_navigation().unwrap();

        for attempt in 1..=3 {
            let update = controller.handle_tracking_error(SensorError::Timeout);
            assert_eq!(update, Some(NavigationUpdate::TrackingLost { error: SensorError::Timeout, failures: attempt }));
            assert_eq!(controller.state(), SessionState::Navigating);
            if attempt < 3 {
                controller.retry_tracking().unwrap();
            }
        }

        assert_eq!(controller.retry_tracking(), Err(SessionError::TrackingGaveUp(3)));
        assert!(controller.message().unwrap().contains("3 times"));
    }

    #[tokio::test]
    async fn snapshots_follow_transitions() {
        let (mut controller, _) = controller(Ok(route())).await;
        let mut snapshots = controller.subscribe();

        pick(&mut controller, "library", "hostel");
        controller.submit().await.unwrap();

        // Only the latest snapshot is observed
        assert!(snapshots.has_changed().unwrap());
        let snapshot = snapshots.borrow_and_update().clone();
        assert_eq!(snapshot.state, SessionState::RouteReady);
        assert_eq!(snapshot.route, Some(route()));
        assert_eq!(snapshot.start.unwrap().label, "Central Library");

        controller.reset();
        assert_eq!(snapshots.borrow_and_update().state, SessionState::Idle);
    }
}
