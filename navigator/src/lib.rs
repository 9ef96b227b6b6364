use const_format::concatcp;

pub mod catalog;
pub mod configuration;
pub mod map_view;
pub mod route_client;
pub mod sampler;
pub mod session;

pub use configuration::{ConfigError, Configuration};
pub use route_client::{RouteClient, RouteError, RouteService};
pub use sampler::{LocationSampler, PositionSource, SensorError, TrackingOptions};
pub use session::{RouteSessionController, SessionError, SessionSnapshot, SessionState};

pub const DATA_DIR: &str = "data/";
pub const CATALOG_PATH: &str = concatcp!(DATA_DIR, "campus_locations.json");
