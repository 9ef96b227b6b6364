pub mod coordinate;
pub mod directions;
pub mod geo_util;
pub mod location;
pub mod location_sample;
pub mod route;
