//! HTTP surface of the L402 credits service: signup, the metered ticker
//! resource, payment requests and provider webhooks.

pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod market;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod sweep;

pub use config::ServerConfig;
pub use error::ServerError;
pub use state::AppState;
