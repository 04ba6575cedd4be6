use crate::{config, server};
use anyhow::Result;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Gateway lifecycle: init → load config → connect store → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let gateway_config = config::GatewayConfig::load(&args.config_path)?;
    let state = server::GatewayState::new(gateway_config).await?;

    let shutdown = Arc::new(Notify::new());
    start_lease_wake_listener(&state, &shutdown).await?;
    start_admin_server(&state, &args);

    tracing::info!("server: starting gateway, listen={}", args.listen);

    let proxy_handle = tokio::spawn({
        let listen = args.listen.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        async move { server::run_proxy_server(&listen, state, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = proxy_handle.await {
        tracing::error!("server: proxy task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, _guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(_guard);
}

/// Subscribes once to the lease-release pub/sub pattern channel and
/// dispatches each message to the matching local `Notify` in the wake
/// registry, so queued waiters suspend instead of busy-polling (§9).
async fn start_lease_wake_listener(state: &server::GatewayState, shutdown: &Arc<Notify>) -> Result<()> {
    let cfg = state.config.load();
    let mut pubsub = crate::store::StoreClient::open_pubsub(&cfg.store.url).await?;
    let pattern = format!("{}:*", cfg.store.pubsub_prefix);
    let prefix_len = cfg.store.pubsub_prefix.len() + 1;
    drop(cfg);

    pubsub.psubscribe(&pattern).await?;

    let wake_registry = state.wake_registry.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else { break };
                    let channel: String = msg.get_channel_name().to_string();
                    if channel.len() > prefix_len {
                        wake_registry.wake(&channel[prefix_len..]);
                    }
                }
                _ = shutdown.notified() => break,
            }
        }
        tracing::info!("server: lease wake listener stopped");
    });

    Ok(())
}

fn start_admin_server(state: &server::GatewayState, args: &BootstrapArgs) {
    let s = state.clone();
    let admin_addr = args.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, s).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
