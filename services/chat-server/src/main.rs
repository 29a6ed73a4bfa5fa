use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use chat_server::config::{resolve_ports, DbConfig};
use chat_server::state::AppState;
use chat_server::{channel_server, db, registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// `chat-server <db-config.json> [msg_port cmd_port data_port]`.
#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let mut args = env::args().skip(1);
    let config_path = args.next().expect("usage: chat-server <db-config.json> [msg_port cmd_port data_port]");
    let positional: Vec<String> = args.collect();
    let ports = resolve_ports(&positional);

    let db_config = DbConfig::load(&PathBuf::from(config_path)).expect("failed to load db config");

    info!("connecting to database...");
    let pool = db::create_pool(&db_config.to_url()).await;
    db::run_migrations(&pool).await;
    info!("migrations applied");

    let storage_dir = env::var("STORAGE_DIR").unwrap_or_else(|_| "./storage".to_owned());
    let state = AppState::new(pool, storage_dir);

    let registry = state.registry.clone();
    tokio::spawn(registry::heartbeat_sweep(registry.clone(), {
        let state = state.clone();
        move |user_id| {
            let state = state.clone();
            async move { state.mark_offline_and_broadcast(&user_id).await }
        }
    }));
    tokio::spawn({
        let cache = Arc::clone(&state.cache);
        async move { cache.run_eviction().await }
    });

    let msg = tokio::spawn(channel_server::run_channel("msg", ports.msg, state.clone()));
    let cmd = tokio::spawn(channel_server::run_channel("cmd", ports.cmd, state.clone()));
    let data = tokio::spawn(channel_server::run_channel("data", ports.data, state.clone()));

    info!(msg_port = ports.msg, cmd_port = ports.cmd, data_port = ports.data, "chat server listening");

    tokio::select! {
        _ = shutdown_signal() => { info!("shutdown signal received"); }
        res = msg => { res.expect("msg channel task panicked"); }
        res = cmd => { res.expect("cmd channel task panicked"); }
        res = data => { res.expect("data channel task panicked"); }
    }
    info!("server shut down");
}

/// Waits for SIGTERM, Ctrl-C (SIGINT), or an operator typing `exit`/`quit`
/// on stdin, and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
        _ = stdin_exit_command() => { info!("exit command received on stdin, shutting down"); },
    }
}

/// Reads lines from stdin until one is `exit` or `quit` (case-insensitive).
/// Returns immediately, without ever resolving, if stdin is closed or not a
/// terminal -- running under a process supervisor with no attached stdin is
/// the common case, and shouldn't spin the loop.
async fn stdin_exit_command() {
    use tokio::io::{AsyncBufReadExt, BufReader};

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
                    return;
                }
            }
            _ => std::future::pending::<()>().await,
        }
    }
}
