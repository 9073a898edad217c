use std::io;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use asclepius::app::{self, AppState};
use asclepius::cli::Cli;
use asclepius::config::Config;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,asclepius=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(&cli).map_err(|e| {
        error!(error = %e, "failed to load config");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;

    let state = AppState::from_config(&config).map_err(|e| {
        error!(error = %e, "failed to start");
        io::Error::new(io::ErrorKind::Other, e)
    })?;
    let state = web::Data::new(state);

    info!("Server running at http://{}", config.server.bind);

    let origins = config.server.allowed_origins.clone();
    if !origins.is_empty() {
        info!(?origins, "cross-origin requests allowed");
    }

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(app::cors(&origins))
            .wrap(Logger::default())
            .configure(app::configure)
    })
    .bind(&config.server.bind)?
    .run()
    .await
}
