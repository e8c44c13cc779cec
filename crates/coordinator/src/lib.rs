//! Entropy Coordinator - coordination plane for the quantum-channel
//! minimization compute farm.
//!
//! Headless API and control loop built with Axum, JWT authentication,
//! and an in-process ephemeral store for dispatch.

pub mod api;
pub mod auth;
pub mod channels;
pub mod config;
pub mod db;
pub mod ephemeral;
pub mod error;
pub mod jobs;
pub mod models;
pub mod reactor;
pub mod server;
pub mod state;
pub mod uploads;

pub use config::Config;
pub use error::{WebError, WebResult};
pub use state::AppState;

/// Start the coordination plane: runs the control loop and HTTP server
/// concurrently until the process is asked to shut down.
pub async fn run(config: Config) -> anyhow::Result<()> {
    server::run_server(config).await
}
