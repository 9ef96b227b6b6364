use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, routing::get, Json, Router};
use campus_nav_lib::{coordinate::Coordinate, location::LocationCatalog, location_sample::LocationSample};
use navigator::{
    sampler::{ManualSource, SensorError, TrackingOptions},
    session::{Endpoint, NavigationEvent, NavigationUpdate, PointChoice, SessionSettings},
    LocationSampler, RouteClient, RouteError, RouteService, RouteSessionController, SessionError, SessionState,
};
use serde_json::json;

const CATALOG: &str = r#"{
    "categories": ["Academic", "Residential", "Food"],
    "locations": [
        {"id": "central-library", "name": "Central Library", "category": "Academic", "lat": 28.525237, "lng": 77.570965},
        {"id": "boys-hostel-1", "name": "Boys Hostel 1", "category": "Residential", "lat": 28.525503, "lng": 77.575042},
        {"id": "food-court", "name": "Food Court", "category": "Food", "lat": 28.525880, "lng": 77.573640}
    ]
}"#;

fn c(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng).unwrap()
}

fn route_json() -> serde_json::Value {
    json!({
        "success": true,
        "route": {
            "start": {"lat": 28.525237, "lng": 77.570965},
            "end": {"lat": 28.525503, "lng": 77.575042},
            "path_coordinates": [
                {"lat": 28.525237, "lng": 77.570965},
                {"lat": 28.525237, "lng": 77.573000},
                {"lat": 28.525503, "lng": 77.575042}
            ],
            "total_distance": 500,
            "estimated_time_minutes": 6
        }
    })
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/api")
}

async fn backend_ok() -> String {
    serve(Router::new().route("/api/route", get(|| async { Json(route_json()) }))).await
}

async fn session(base_url: &str) -> (RouteSessionController<RouteClient>, Arc<ManualSource>) {
    let source = Arc::new(ManualSource::new());
    let sampler = LocationSampler::initialize(Some(source.clone()), TrackingOptions::default()).await;
    let client = RouteClient::new(base_url, Duration::from_secs(5)).unwrap();
    let catalog = LocationCatalog::from_json(CATALOG).unwrap();

    (RouteSessionController::new(catalog, client, sampler, SessionSettings::default()), source)
}

fn pick(controller: &mut RouteSessionController<RouteClient>) {
    controller.select(Endpoint::Start, PointChoice::Catalog("central-library".into())).unwrap();
    controller.select(Endpoint::End, PointChoice::Catalog("boys-hostel-1".into())).unwrap();
}

async fn navigating(base_url: &str) -> (RouteSessionController<RouteClient>, Arc<ManualSource>) {
    let (mut controller, source) = session(base_url).await;
    pick(&mut controller);
    controller.submit().await.unwrap();
    controller.start_navigation().unwrap();
    (controller, source)
}

fn sample(ts: i64, lat: f64, lng: f64) -> LocationSample {
    LocationSample::new(c(lat, lng), 5., ts)
}

#[tokio::test]
async fn planned_route_is_ready() {
    let base = backend_ok().await;
    let (mut controller, _) = session(&base).await;
    pick(&mut controller);
    assert_eq!(controller.state(), SessionState::Selecting);

    controller.submit().await.unwrap();

    assert_eq!(controller.state(), SessionState::RouteReady);
    let route = controller.route().unwrap();
    assert_eq!(route.start, c(28.525237, 77.570965));
    assert_eq!(route.end, c(28.525503, 77.575042));
    assert_eq!(route.total_distance_m, 500.);
    assert_eq!(route.estimated_time_minutes, 6.);
    assert!(route.path_coordinates.len() >= 2);
    assert!(!controller.instructions().is_empty());
}

#[tokio::test]
async fn server_error_returns_to_selecting() {
    let ok = backend_ok().await;
    let failing = serve(Router::new().route("/api/route", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))).await;

    // A route from an earlier request must not survive the failure
    let (mut controller, _) = session(&ok).await;
    pick(&mut controller);
    controller.submit().await.unwrap();
    let request = controller.begin_submit().unwrap();
    let outcome = RouteClient::new(&failing, Duration::from_secs(5))
        .unwrap()
        .compute_route(request.start, request.end)
        .await;
    let err = controller.complete_submit(outcome).unwrap_err();

    assert_eq!(err, SessionError::Route(RouteError::ServerError(500)));
    assert_eq!(controller.state(), SessionState::Selecting);
    assert!(controller.route().is_none());
    assert!(controller.message().is_some());
    assert!(controller.snapshot().route.is_none());
}

#[tokio::test]
async fn backend_without_route_reports_message() {
    let base = serve(Router::new().route(
        "/api/route",
        get(|| async { Json(json!({"success": false, "error": "Destination is not reachable on foot"})) }),
    ))
    .await;
    let (mut controller, _) = session(&base).await;
    pick(&mut controller);

    let err = controller.submit().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::Route(RouteError::RouteNotFound("Destination is not reachable on foot".into()))
    );
    assert_eq!(controller.message(), Some("No route found: Destination is not reachable on foot"));
    assert_eq!(controller.state(), SessionState::Selecting);
}

#[tokio::test]
async fn swap_twice_restores_selection() {
    let base = backend_ok().await;
    let (mut controller, _) = session(&base).await;
    pick(&mut controller);
    let before = (controller.selection(Endpoint::Start).cloned(), controller.selection(Endpoint::End).cloned());

    controller.swap().unwrap();
    assert_eq!(controller.selection(Endpoint::Start), before.1.as_ref());
    assert_eq!(controller.selection(Endpoint::End), before.0.as_ref());

    controller.swap().unwrap();
    let after = (controller.selection(Endpoint::Start).cloned(), controller.selection(Endpoint::End).cloned());
    assert_eq!(before, after);
}

#[tokio::test]
async fn swap_needs_both_endpoints() {
    let base = backend_ok().await;
    let (mut controller, _) = session(&base).await;
    controller.select(Endpoint::Start, PointChoice::Catalog("food-court".into())).unwrap();
    assert_eq!(controller.swap(), Err(SessionError::IncompleteSelection));
}

#[tokio::test]
async fn reset_is_idempotent_from_any_state() {
    let base = backend_ok().await;
    let (mut controller, _) = navigating(&base).await;
    assert!(controller.sampler().is_tracking());

    for _ in 0..2 {
        controller.reset();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.selection(Endpoint::Start).is_none());
        assert!(controller.selection(Endpoint::End).is_none());
        assert!(controller.route().is_none());
        assert!(controller.navigation().is_none());
        assert!(!controller.sampler().is_tracking());
    }
}

#[tokio::test]
async fn permission_denied_keeps_navigating() {
    let base = backend_ok().await;
    let (mut controller, source) = navigating(&base).await;

    source.push_error(SensorError::PermissionDenied);
    let update = controller.next_update().await;

    assert_eq!(
        update,
        Some(NavigationUpdate::TrackingLost { error: SensorError::PermissionDenied, failures: 1 })
    );
    assert_eq!(controller.state(), SessionState::Navigating);
    assert!(!controller.sampler().is_tracking());
    assert!(controller.message().unwrap().contains("permission"));

    controller.retry_tracking().unwrap();
    assert!(controller.sampler().is_tracking());
    assert_eq!(controller.state(), SessionState::Navigating);
}

#[tokio::test]
async fn arrival_is_reported_once() {
    let base = backend_ok().await;
    let (mut controller, source) = navigating(&base).await;

    let mut arrivals = 0;
    let fixes = [
        (1, 28.525237, 77.5720),
        (2, 28.52549, 77.57500),
        (3, 28.52550, 77.57503),
        (4, 28.525503, 77.575042),
    ];
    for (ts, lat, lng) in fixes {
        source.push_sample(sample(ts, lat, lng));
        match controller.next_update().await {
            Some(NavigationUpdate::Moved { event, progress }) => {
                assert_eq!(progress.timestamp_ms, ts);
                if event == Some(NavigationEvent::Arrived) {
                    arrivals += 1;
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    assert_eq!(arrivals, 1);
    assert!(controller.snapshot().arrived);
    // Arrival does not end tracking by itself
    assert!(controller.sampler().is_tracking());
    assert_eq!(controller.state(), SessionState::Navigating);
}

#[tokio::test]
async fn out_of_order_samples_are_ignored() {
    let base = backend_ok().await;
    let (mut controller, _) = navigating(&base).await;

    controller.handle_sample(sample(200, 28.525237, 77.5712)).unwrap();
    assert_eq!(
        controller.handle_sample(sample(100, 28.525237, 77.5711)),
        Err(SessionError::StaleSample(100))
    );
    assert_eq!(
        controller.handle_sample(sample(200, 28.525237, 77.5713)),
        Err(SessionError::StaleSample(200))
    );
    controller.handle_sample(sample(300, 28.525237, 77.5714)).unwrap();

    assert_eq!(controller.latest_sample().unwrap().timestamp_ms, 300);
}

#[tokio::test]
async fn samples_after_stop_are_not_processed() {
    let base = backend_ok().await;
    let (mut controller, source) = navigating(&base).await;

    controller.stop_navigation();
    source.push_sample(sample(1, 28.525237, 77.5712));

    assert_eq!(controller.state(), SessionState::RouteReady);
    assert_eq!(controller.next_update().await, None);
    assert!(matches!(
        controller.handle_sample(sample(2, 28.525237, 77.5712)),
        Err(SessionError::NotPermitted { .. })
    ));
    assert!(controller.latest_sample().is_none());
}

#[tokio::test]
async fn samples_while_tracking_is_down_are_not_processed() {
    let base = backend_ok().await;
    let (mut controller, _) = navigating(&base).await;

    controller.handle_tracking_error(SensorError::Timeout);
    assert_eq!(
        controller.handle_sample(sample(5, 28.525237, 77.5712)),
        Err(SessionError::StaleSample(5))
    );
}
