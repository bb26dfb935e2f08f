pub mod config;
pub mod errors;
pub mod models;
pub mod engine;
pub mod networks;
pub mod secrets;
pub mod store;
pub mod database;
pub mod services;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod security_middleware;
pub mod telemetry;

pub use config::Config;
pub use errors::{FacilitatorError, Result};
