use std::{fs::OpenOptions, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context};
use campus_nav_lib::coordinate::Coordinate;
use clap::{Args, Parser, Subcommand};
use navigator::{
    catalog::load_catalog,
    map_view::{GeoJsonMapView, MapView, TerminalMapView},
    sampler::{GpxReplaySource, NmeaSource},
    session::{Endpoint, NavigationEvent, NavigationUpdate, PointChoice},
    Configuration, LocationSampler, PositionSource, RouteClient, RouteSessionController, SessionError,
    SessionSnapshot,
};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Endpoint keyword for the device's own position.
const HERE: &str = "here";

#[derive(Parser)]
#[command(name = "campus-nav")]
#[command(about = "Find your way around campus", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the campus locations
    Locations {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Plan a route and print it. Endpoints are location ids, `lat,lng` or `here` for the start
    Route {
        from: String,
        to: String,
        #[command(flatten)]
        source: SourceArgs,
        /// Also write the route as GeoJSON
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
    /// Plan a route and follow it with a live position source
    Navigate {
        from: String,
        to: String,
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        geojson: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Replay a recorded GPX track as the live position
    #[arg(long, conflicts_with = "nmea")]
    replay: Option<PathBuf>,
    /// Replay speed factor
    #[arg(long, default_value_t = 1.0, requires = "replay")]
    speed: f64,
    /// Read NMEA sentences from a device or log file
    #[arg(long)]
    nmea: Option<PathBuf>,
}

impl SourceArgs {
    fn position_source(&self) -> anyhow::Result<Option<Arc<dyn PositionSource>>> {
        if let Some(path) = &self.replay {
            let replay = GpxReplaySource::open(path)
                .with_context(|| format!("loading replay track {}", path.display()))?
                .with_speed(self.speed);
            return Ok(Some(Arc::new(replay)));
        }
        if let Some(path) = &self.nmea {
            // Logs are paced by their timestamps, devices by themselves
            return Ok(Some(Arc::new(NmeaSource::new(path).paced(path.is_file()))));
        }
        Ok(None)
    }
}

enum Step {
    Interrupted,
    Update(Option<NavigationUpdate>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Configuration::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config)?;
    tracing::debug!("Using navigation server at {}", config.api_base_url);

    match cli.command {
        Commands::Locations { category, search } => list_locations(&config, category, search).await,
        Commands::Route { from, to, source, geojson } => {
            let mut controller = controller(&config, source.position_source()?).await?;
            let mut views = views(geojson);
            let mut snapshots = controller.subscribe();

            let planned = plan(&mut controller, &from, &to).await;
            render(&mut views, &mut snapshots)?;
            planned
        }
        Commands::Navigate { from, to, source, geojson } => {
            let source = source
                .position_source()?
                .ok_or_else(|| anyhow!("navigation needs a position source, pass --replay or --nmea"))?;
            let mut controller = controller(&config, Some(source)).await?;
            let mut views = views(geojson);
            let mut snapshots = controller.subscribe();

            let planned = plan(&mut controller, &from, &to).await;
            render(&mut views, &mut snapshots)?;
            planned?;

            controller.start_navigation().map_err(user_error)?;
            let navigated = follow(&mut controller, &mut views, &mut snapshots).await;

            controller.stop_navigation();
            render(&mut views, &mut snapshots)?;
            navigated
        }
    }
}

fn init_logging(config: &Configuration) -> anyhow::Result<()> {
    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir).with_context(|| format!("creating log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("navigator=info,{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

async fn list_locations(
    config: &Configuration,
    category: Option<String>,
    search: Option<String>,
) -> anyhow::Result<()> {
    let catalog = load_catalog(&config.catalog_path()).await?;

    if let Some(category) = &category {
        if !catalog.categories().contains(category) {
            return Err(anyhow!(
                "unknown category {:?}, expected one of: {}",
                category,
                catalog.categories().join(", ")
            ));
        }
    }

    let matches = match &search {
        Some(query) => catalog.search(query),
        None => catalog.locations().iter().collect(),
    };

    for location in matches
        .into_iter()
        .filter(|l| category.as_ref().map_or(true, |c| &l.category == c))
    {
        println!(
            "{:<20} {:<28} {:<15} {}",
            location.id, location.name, location.category, location.coordinate
        );
    }

    Ok(())
}

async fn controller(
    config: &Configuration,
    source: Option<Arc<dyn PositionSource>>,
) -> anyhow::Result<RouteSessionController<RouteClient>> {
    let catalog = load_catalog(&config.catalog_path())
        .await
        .context("loading the location catalog")?;
    let client = RouteClient::from_config(config)?;
    let sampler = LocationSampler::initialize(source, config.tracking).await;

    Ok(RouteSessionController::new(catalog, client, sampler, config.session_settings()))
}

fn views(geojson: Option<PathBuf>) -> Vec<Box<dyn MapView>> {
    let mut views: Vec<Box<dyn MapView>> = vec![Box::new(TerminalMapView::new(std::io::stdout()))];
    if let Some(path) = geojson {
        views.push(Box::new(GeoJsonMapView::new(path)));
    }
    views
}

/// Renders the latest snapshot if it changed since the last call.
fn render(views: &mut [Box<dyn MapView>], snapshots: &mut watch::Receiver<SessionSnapshot>) -> anyhow::Result<()> {
    if !snapshots.has_changed().unwrap_or(false) {
        return Ok(());
    }

    let snapshot = snapshots.borrow_and_update().clone();
    for view in views.iter_mut() {
        view.render(&snapshot)?;
    }
    Ok(())
}

fn user_error(error: SessionError) -> anyhow::Error {
    anyhow!(error.user_message())
}

async fn choose(
    controller: &mut RouteSessionController<RouteClient>,
    endpoint: Endpoint,
    input: &str,
) -> Result<(), SessionError> {
    if input.eq_ignore_ascii_case(HERE) {
        return controller.use_current_location(endpoint).await;
    }

    match input.parse::<Coordinate>() {
        Ok(coordinate) => controller.select(endpoint, PointChoice::MapTap(coordinate)),
        Err(_) => controller.select(endpoint, PointChoice::Catalog(input.to_owned())),
    }
}

async fn plan(controller: &mut RouteSessionController<RouteClient>, from: &str, to: &str) -> anyhow::Result<()> {
    choose(controller, Endpoint::Start, from).await.map_err(user_error)?;
    choose(controller, Endpoint::End, to).await.map_err(user_error)?;
    controller.submit().await.map_err(user_error)
}

/// Follows live updates until arrival, Ctrl-C or lost tracking.
async fn follow(
    controller: &mut RouteSessionController<RouteClient>,
    views: &mut [Box<dyn MapView>],
    snapshots: &mut watch::Receiver<SessionSnapshot>,
) -> anyhow::Result<()> {
    render(views, snapshots)?;

    loop {
        let step = tokio::select! {
            _ = tokio::signal::ctrl_c() => Step::Interrupted,
            update = controller.next_update() => Step::Update(update),
        };
        render(views, snapshots)?;

        match step {
            Step::Interrupted => {
                tracing::info!("Navigation interrupted");
                return Ok(());
            }
            Step::Update(Some(NavigationUpdate::Moved { event: Some(NavigationEvent::Arrived), .. })) => {
                return Ok(());
            }
            Step::Update(Some(NavigationUpdate::TrackingLost { error, failures })) => {
                return Err(anyhow!("{error} (failure {failures}), stopping navigation"));
            }
            Step::Update(Some(_)) => {}
            Step::Update(None) => return Ok(()),
        }
    }
}
