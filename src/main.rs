use std::net::SocketAddr;
use std::process;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Router};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{compression::CompressionLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{fmt::{writer::BoxMakeWriter, Layer}, layer::SubscriberExt, EnvFilter, Registry};

use config::Config;
use db::postgres::PgListingStore;
use lifecycle::{sweeper::StaleSweeper, EngineSettings, LifecycleEngine};
use routes::{rate_limit::RateLimiter, AppState};
use services::{
    geocoding::{GeocodingResolver, HttpGeocoder},
    identity::JwtIdentityVerifier,
    notification::HttpNotifier,
    payment::HttpPaymentGateway,
    retry::RetryPolicy,
    storage::SupabaseObjectStore,
};

mod config;
mod db;
mod error;
mod lifecycle;
mod routes;
mod services;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // json into the log file, plain text on stdout
    let file_layer = Layer::new().json().with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .with(stdout_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global subscriber: {err}");
        process::exit(1);
    }

    let database_pool = match process_database(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            tracing::info!(port = config.port, "Listening");
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let router = match process_begin(database_pool, &config) {
        Ok(router) => {
            tracing::info!("Routes constructed successfully");
            router
        }
        Err(err) => {
            tracing::error!("Failed to construct routes: {}", err);
            process::exit(1);
        }
    };

    //start the http service
    let http_service = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>());
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

/// Build the collaborators, start the stale sweeper and assemble the router.
fn process_begin(db_pool: PgPool, config: &Config) -> Result<Router, String> {
    let store = Arc::new(PgListingStore::new(db_pool));
    let gateway = HttpPaymentGateway::new(&config.payment)
        .map_err(|err| format!("Failed to build payment client: {err}"))?;
    let geocoder = HttpGeocoder::new(&config.geocoding)
        .map_err(|err| format!("Failed to build geocoding client: {err}"))?;
    let resolver = GeocodingResolver::new(Arc::new(geocoder), config.geocoding.cache_ttl);
    let notifier = HttpNotifier::new(&config.notification_url, config.notification_timeout, RetryPolicy::standard())
        .map_err(|err| format!("Failed to build notification client: {err}"))?;
    let verifier = JwtIdentityVerifier::new(
        config.jwt_secret.clone(),
        config.user_management_url.clone(),
        config.identity_timeout,
        config.identity_cache_ttl,
        RetryPolicy::standard(),
    )
    .map_err(|err| format!("Failed to build identity client: {err}"))?;
    let storage = SupabaseObjectStore::new(&config.storage)
        .map_err(|err| format!("Failed to build storage client: {err}"))?;
    let cors = routes::cors_layer(&config.cors_origins)?;

    let engine = Arc::new(LifecycleEngine::new(
        store,
        Arc::new(gateway),
        Arc::new(notifier),
        Arc::new(resolver),
        EngineSettings::from(config),
    ));

    let _sweeper = StaleSweeper::new(engine.clone(), config.sweep_interval).spawn();
    tracing::info!(every = ?config.sweep_interval, stale_after_days = config.stale_after.num_days(), "Stale property sweeper scheduled");

    let state = AppState {
        engine,
        verifier: Arc::new(verifier),
        storage: Arc::new(storage),
        webhook_key: Arc::from(config.payment.api_key.as_str()),
        limiter: RateLimiter::new(&config.rate_limit),
    };

    let router = routes::app_routes(state)
        .layer(CompressionLayer::new().gzip(true))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10)) // 10MB, photo uploads
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // assume the schema is already in place and keep going
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}
