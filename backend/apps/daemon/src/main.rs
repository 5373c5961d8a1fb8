//! Check-in Daemon Entry Point
//!
//! Validates configuration, prepares the database and runs periodic
//! maintenance for the check-in core. Uses `anyhow` for startup errors;
//! check-in errors are `checkin::CheckinError`.

use checkin::{CheckinConfig, PgCheckinStore, PgFailureCounterStore};
use chrono::{Days, Utc};
use platform::rate_limit::FailureLimiter;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 300;

type PgLimiter = FailureLimiter<PgFailureCounterStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checkin=info,checkin_daemon=info,platform=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration is validated before anything touches the database
    let config = CheckinConfig::from_env()?;
    tracing::info!(
        code_length = config.code_length,
        resolver_max_attempts = config.resolver_max_attempts,
        pickup_max_attempts = config.pickup_rate_limit.max_attempts,
        pickup_window_secs = config.pickup_rate_limit.window.as_secs(),
        "Configuration loaded"
    );

    let max_connections = env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
    let interval_secs = env_or(
        "CHECKIN_MAINTENANCE_INTERVAL_SECS",
        DEFAULT_MAINTENANCE_INTERVAL_SECS,
    )?;

    // Database connection
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set in environment"))?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let store = PgCheckinStore::new(pool.clone());
    let limiter = FailureLimiter::with_system_clock(
        PgFailureCounterStore::new(pool.clone()),
        config.pickup_rate_limit.clone(),
    );

    // Startup cleanup; failures here should not prevent startup
    run_maintenance(&store, &limiter, &config).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.tick().await;

    tracing::info!(interval_secs = interval_secs, "Maintenance scheduled");

    loop {
        tokio::select! {
            _ = ticker.tick() => run_maintenance(&store, &limiter, &config).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    pool.close().await;
    Ok(())
}

async fn run_maintenance(store: &PgCheckinStore, limiter: &PgLimiter, config: &CheckinConfig) {
    match limiter.purge_expired().await {
        Ok(counters) => {
            tracing::info!(counters_deleted = counters, "Failure counter cleanup completed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failure counter cleanup failed, continuing anyway");
        }
    }

    let today = Utc::now().date_naive();
    let Some(cutoff) = today.checked_sub_days(Days::new(u64::from(config.code_retention_days)))
    else {
        tracing::warn!(
            retention_days = config.code_retention_days,
            "Code retention out of range, skipping code cleanup"
        );
        return;
    };

    match store.purge_codes_before(cutoff).await {
        Ok(codes) => {
            tracing::info!(codes_deleted = codes, cutoff = %cutoff, "Attendance code cleanup completed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Attendance code cleanup failed, continuing anyway");
        }
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
