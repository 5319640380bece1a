use mimalloc::MiMalloc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use switchboard::config::Config;
use switchboard::dispatch::Dispatcher;
use switchboard::providers::ProviderRegistry;
use switchboard::ratelimit::RateLimitRegistry;
use switchboard::secrets::AesGcmCipher;
use switchboard::server::router::{AppState, app_router};
use switchboard_thoughtsig::SignatureStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Signature-cache maintenance period.
const SIGNATURE_SWEEP_SECS: u64 = 5 * 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The server binary requires a real config file with a non-empty
    // master_key; library code uses `config::CONFIG`, which is best-effort.
    let cfg = Config::from_toml();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let db = switchboard::db::spawn(cfg.basic.database_url.as_str()).await;
    let cipher = Arc::new(AesGcmCipher::from_master_key(&cfg.basic.master_key));
    let sigstore = Arc::new(SignatureStore::default());
    let limits = Arc::new(RateLimitRegistry::new());

    let registry = Arc::new(ProviderRegistry::build(
        &cfg,
        db.clone(),
        cipher.clone(),
        sigstore.clone(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        db.clone(),
        cipher.clone(),
        limits,
        cfg.providers.defaults.retry_max_times,
        cfg.providers.defaults.retry_base_ms,
    ));

    // Periodic maintenance keeps expired signatures from lingering between
    // reads; aborted on shutdown.
    let sweep_store = sigstore.clone();
    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(SIGNATURE_SWEEP_SECS));
        loop {
            tick.tick().await;
            sweep_store.sweep();
        }
    });

    let state = AppState::new(dispatcher, db, cipher);
    let app = app_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}
