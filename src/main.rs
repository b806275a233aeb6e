use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use kaitu_center::api::router;
use kaitu_center::config::Config;
use kaitu_center::ech::{EchKeystore, RotationScheduler};
use kaitu_center::state::AppState;
use kaitu_center::storage::Store;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = Config::from_env().expect("configuration");
    let store = Store::open(&config.data_dir.join("center.redb")).expect("open store");

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("bind address");

    let state = AppState::new(config, store);

    let shutdown = CancellationToken::new();
    let keystore: Arc<EchKeystore> = state.keystore.clone();
    let rotation = tokio::spawn(RotationScheduler::new(keystore).run(shutdown.clone()));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.expect("bind");
    tracing::info!(%addr, "kaitu-center listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .expect("server");

    shutdown.cancel();
    let _ = rotation.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolve on SIGINT or SIGTERM and propagate to background tasks.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
