use std::{fs::OpenOptions, sync::Arc, time::Duration};

use axum::Router;
use tokio::{net::TcpListener, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use agenda_sync::{
    api::{self, AppState},
    clinicorp::ClinicorpClient,
    config::Config,
    db::Database,
    scheduler,
    services::{AgendaService, ChatService},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env());

    // -----------------------------
    // Logging
    // -----------------------------
    init_logging(&config)?;

    println!("🚀 Starting Clinicorp agenda sync...");

    // -----------------------------
    // Shared state / Dependencies
    // -----------------------------
    let database_url = config.resolve_database_url();
    let db = Database::connect(database_url.as_deref()).await;
    println!(
        "🗄  Database: {}",
        if db.is_connected() { "connected" } else { "not connected" }
    );

    let clinicorp = Arc::new(ClinicorpClient::new(
        config.clinicorp.clone(),
        config.utc_offset_minutes,
    )?);
    let agenda = Arc::new(AgendaService::new(
        db.clone(),
        clinicorp,
        config.clinic_offset(),
    ));
    let chat = Arc::new(ChatService::new(db.clone(), config.chat_history_days));

    let state = AppState {
        agenda: agenda.clone(),
        chat,
        db,
    };

    // -----------------------------
    // Routers
    // -----------------------------
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state);

    // -----------------------------
    // Scheduler
    // -----------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.scheduler_enabled {
        println!("⏱  Sync every {}s", config.sync_interval_secs);
        Some(scheduler::spawn(
            agenda,
            Duration::from_secs(config.sync_interval_secs),
            shutdown_rx,
        ))
    } else {
        info!("scheduler disabled (SCHEDULER_ENABLED=false)");
        None
    };

    let addr = config.bind_addr();
    println!("🌐 HTTP listening on http://{addr}");
    println!("🩺 Health at http://{addr}/api/health");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if let Some(handle) = scheduler {
        if let Err(err) = handle.await {
            warn!(error = %err, "scheduler task ended abnormally");
        }
    }
    info!("server stopped");
    Ok(())
}

/// Console output plus an optional plain-text log file. `RUST_LOG` overrides `LOG_LEVEL`.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    let file_layer = match &config.log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .with_filter(filter()),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();
    Ok(())
}

/// Ctrl-C, or SIGTERM from `systemctl stop`.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
