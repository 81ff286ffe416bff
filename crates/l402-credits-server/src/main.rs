use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use l402_server::{
    config::ServerConfig, metrics::register_metrics, routes, state::AppState,
    sweep::start_expiry_sweep,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env().expect("Failed to load configuration");
    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let rate_limit_rpm = config.rate_limit_rpm;
    let sweep_every = Duration::from_secs(config.expiry_sweep_interval_secs);

    tracing::info!("Starting l402-credits-server on port {}", port);
    tracing::info!(
        "Late settlements: {}",
        if config.accept_late_settlements {
            "accepted"
        } else {
            "refused"
        }
    );

    register_metrics();

    let state = AppState::from_config(config).expect("Failed to initialize application state");
    tracing::info!(rails = ?state.enabled_rails(), "payment rails enabled");

    start_expiry_sweep(state.store.clone(), sweep_every);

    let state_data = web::Data::new(state);

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
        .expect("Failed to create rate limiter config");

    HttpServer::new(move || {
        let cors = l402_server::cors::build_cors(&allowed_origins);

        App::new()
            .app_data(state_data.clone())
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Governor::new(&governor_conf))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
