// src/main.rs

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use shopeasy::config::Config;
use shopeasy::error::expose_internal_details;
use shopeasy::routes;
use shopeasy::services::{
    clock::{Clock, SystemClock},
    notifier::{LogNotifier, Notifier, SmtpNotifier},
    registration::InMemoryRegistrationCache,
};
use shopeasy::state::AppState;
use shopeasy::store::Stores;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration from environment (.env included)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    expose_internal_details(config.is_development());

    let stores = match &config.database_url {
        Some(url) => {
            let pool = connect_with_retry(url).await?;

            // Run Migrations Automatically
            tracing::info!("Running migrations...");
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("Migrations applied successfully.");

            Stores::postgres(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store. Data will not survive a restart.");
            Stores::in_memory()
        }
    };

    // Seed Admin User
    if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
        if let Err(e) = stores.seed_admin(email, password).await {
            tracing::error!("Failed to seed admin user: {}", e);
        }
    }

    let notifier: Arc<dyn Notifier> = match &config.smtp_url {
        Some(url) => Arc::new(SmtpNotifier::new(url, &config.mail_from)?),
        None => {
            tracing::warn!("SMTP_URL not set; emails will only be logged.");
            Arc::new(LogNotifier::new(config.is_development()))
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registrations = Arc::new(InMemoryRegistrationCache::new(clock.clone(), config.otp_ttl));
    let bind_addr = config.bind_addr;
    let poll_interval = config.saga_poll_interval;

    let state = AppState::new(config, stores, registrations, notifier, clock.clone());

    // Resumes sagas left unfinished by a previous run, then keeps polling.
    let _recovery = state.saga_coordinator(clock).start(poll_interval);

    // Create the Axum application router
    let app = routes::create_router(state);

    tracing::info!("Listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    // Start the server
    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize Database Pool with Retry
async fn connect_with_retry(url: &str) -> Result<PgPool, sqlx::Error> {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(url)
            .await
        {
            Ok(pool) => {
                tracing::info!("Database connected...");
                return Ok(pool);
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    tracing::error!("Failed to connect to database after 5 retries");
                    return Err(e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
