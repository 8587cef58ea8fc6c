pub mod models {
    pub mod sensor;
    pub mod uplink;
}

pub mod api;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod error;
pub mod schema;
pub mod store;
pub mod utils;
pub mod services {
    pub mod decoder;
    pub mod devices;
    pub mod ingest;
    pub mod measurements;
    pub mod retention;
    pub mod rooms;
}

use crate::api::AppState;
use crate::config::Config;
use crate::services::retention::{self, CleanupGate};
use crate::store::TelemetryStore;
use crate::store::pg::PgStore;
use chrono::Utc;
use diesel::PgConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

fn apply_database_migrations(conn: &mut PgConnection) -> Result<(), String> {
    match conn.run_pending_migrations(MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

/// Opens the pool, migrates the schema and drops already-expired rows.
fn prepare_store(cfg: &Config) -> Result<PgStore, String> {
    let store = PgStore::connect(&cfg.database_url, cfg.pool_size).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database (pool_size={})", cfg.pool_size);

    let mut conn = store.conn().map_err(|e| format!("DB connection failed: {}", e))?;
    apply_database_migrations(&mut conn)?;
    drop(conn);

    let deleted = retention::cleanup(&store, cfg.retention, Utc::now());
    info!("Startup cleanup removed {} expired measurement(s)", deleted);
    Ok(store)
}

pub async fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (database={}, bind={}, retention={}d, liveness={}m, chart_bucket={}m, cleanup_interval={})",
        cfg.redacted_database_url(),
        cfg.bind_addr,
        cfg.retention.num_days(),
        cfg.liveness.num_minutes(),
        cfg.chart.bucket.num_minutes(),
        cfg.cleanup_interval
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".to_string()),
    );

    // 2) Connect DB, apply migrations, initial cleanup
    let setup_cfg = cfg.clone();
    let pg = tokio::task::spawn_blocking(move || prepare_store(&setup_cfg))
        .await
        .map_err(|e| format!("startup task failed: {}", e))??;
    let store: Arc<dyn TelemetryStore> = Arc::new(pg);

    // 3) Periodic cleanup
    let cleanup_gate = CleanupGate::default();
    if let Some(period) = cfg.cleanup_interval {
        info!("Starting cleanup timer: interval={}s", period.as_secs());
        tokio::spawn(retention::run_timer(store.clone(), cfg.retention, period, cleanup_gate.clone()));
    } else {
        info!("Cleanup timer disabled; cleanup runs on webhook traffic and on demand");
    }

    // 4) Serve
    let bind_addr = cfg.bind_addr;
    let app = api::build_router(Arc::new(AppState {
        store,
        config: cfg,
        cleanup_gate,
    }));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| format!("bind {} failed: {}", bind_addr, e))?;
    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("server error: {}", e))?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            _ => {
                warn!("Unable to install signal handlers; falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received");
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path_str = &s["--env-file=".len()..];
                if path_str.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path_str));
            }
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    // Values already present in the process environment win over the file.
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        dotenvy::from_path(&path).map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            dotenvy::from_path(&default_path).map_err(|e| format!("failed to load {}: {}", default_path.display(), e))?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "room-telemetry {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run().await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
