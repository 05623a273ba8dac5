mod admission;
mod config;
mod logging;
mod node_cache;
mod server;

use anyhow::Result;
use clap::Parser;
use tokio::sync::oneshot;

use crate::admission::WebhookState;
use crate::config::WebhookArgs;
use crate::node_cache::NodeCapacityCache;
use crate::node_cache::NodeWatcher;
use crate::server::WebhookServer;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let args = WebhookArgs::parse();
    logging::init();

    tracing::info!("Starting node-specific sizing webhook");

    let nodes = NodeCapacityCache::default();

    let watcher = NodeWatcher::new(args.kubeconfig.clone(), nodes.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create node watcher: {e:?}"))?;

    let (watcher_shutdown_tx, watcher_shutdown_rx) = oneshot::channel();
    let watcher_handle = tokio::spawn(async move { watcher.run(watcher_shutdown_rx).await });

    let state = WebhookState {
        nodes,
        fail_open: args.fail_open,
    };
    let server = WebhookServer::new(
        state,
        args.listen_addr.clone(),
        &args.tls_cert_file,
        &args.tls_key_file,
    )
    .map_err(|e| anyhow::anyhow!("Failed to create admission server: {e:?}"))?;

    let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel();
    let mut server_handle = tokio::spawn(async move { server.run(server_shutdown_rx).await });

    // Run until interrupted, or until the server dies on its own.
    let server_result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            let _ = server_shutdown_tx.send(());
            server_handle.await?
        }
        result = &mut server_handle => result?,
    };

    let _ = watcher_shutdown_tx.send(());
    watcher_handle
        .await?
        .map_err(|e| anyhow::anyhow!("Node watcher failed: {e:?}"))?;

    server_result.map_err(|e| anyhow::anyhow!("Admission server failed: {e:?}"))?;

    Ok(())
}
