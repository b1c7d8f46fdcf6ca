//! Node orchestrator.
//!
//! Coordinates the node's components: overlay, download service and the
//! interactive shell.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::task::JoinHandle;

use floodnet_p2p::download::DownloadService;
use floodnet_p2p::manager::resolve_peer;
use floodnet_p2p::{FileIndex, FloodNode, NodeHandle};

use crate::config::NodeConfig;
use crate::shell::{run_shell, ShellExit};
use crate::shutdown::{shutdown_channel, wait_for_shutdown_signal, ShutdownTx};

/// How long to wait for the overlay to finish closing connections.
const OVERLAY_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// The main node structure.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,

    /// Overlay node, until it is started.
    overlay: FloodNode,

    /// Download service, until it is started.
    downloads: DownloadService,

    /// Shutdown signal sender.
    shutdown_tx: ShutdownTx,
}

impl Node {
    /// Create a new node with the given configuration.
    ///
    /// Fails if the shared directory is unusable or the download port
    /// cannot be bound.
    pub async fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let files = Arc::new(
            FileIndex::open(&config.shared_dir)
                .await
                .with_context(|| format!("Invalid directory path: {}", config.shared_dir.display()))?,
        );

        let downloads = DownloadService::bind(config.download_bind_addr(), files.clone())
            .await
            .with_context(|| format!("Unable to bind download port {}", config.download_port))?;
        let download_port = downloads.local_addr()?.port();

        let overlay = FloodNode::with_file_index(config.p2p_config(download_port), files).await;
        let (shutdown_tx, _) = shutdown_channel();

        Ok(Self {
            config,
            overlay,
            downloads,
            shutdown_tx,
        })
    }

    /// Handle for driving the overlay.
    pub fn handle(&self) -> NodeHandle {
        self.overlay.handle()
    }

    /// Run the node until `exit` or a shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            config,
            mut overlay,
            downloads,
            shutdown_tx,
        } = self;

        tracing::info!("Starting floodnet node...");
        tracing::info!("  Node address: {}", config.node_addr);
        tracing::info!("  Download address: {}:{}", config.advertise, downloads.local_addr()?.port());
        tracing::info!("  Shared directory: {}", config.shared_dir.display());
        tracing::info!("  Search TTL: {}", config.initial_ttl);
        tracing::info!("  Routing service: {}", config.routing_service);

        let handle = overlay.handle();
        let reports = overlay
            .reports()
            .context("search reports already taken")?;
        let overlay_shutdown = overlay.shutdown_handle();
        let bound = overlay.bound_addr_receiver();

        let download_task = tokio::spawn(downloads.run(shutdown_tx.subscribe()));
        let overlay_task: JoinHandle<floodnet_p2p::P2pResult<()>> = tokio::spawn(overlay.run());

        // Startup fails fast if the node port is taken
        if bound.await.is_err() {
            return match overlay_task.await {
                Ok(Err(e)) => Err(e).context("Unable to start node listener"),
                Ok(Ok(())) => anyhow::bail!("node listener stopped during startup"),
                Err(e) => Err(e).context("node task failed during startup"),
            };
        }

        for peer in &config.peers {
            if let Err(e) = dial(&handle, peer).await {
                tracing::warn!(peer = %peer, error = %format!("{:#}", e), "Startup connection failed");
            }
        }

        let mut stdin = BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();

        tokio::select! {
            result = run_shell(&mut stdin, &mut stdout, &handle, reports) => {
                match result? {
                    ShellExit::Exit => {}
                    ShellExit::InputClosed => {
                        tracing::info!("Input closed, running until signalled");
                        wait_for_shutdown_signal().await?;
                    }
                }
            }
            result = wait_for_shutdown_signal() => result?,
        }

        // Initiate shutdown
        tracing::info!("Shutting down node...");
        let _ = shutdown_tx.send(());
        let _ = overlay_shutdown.send(()).await;

        match tokio::time::timeout(OVERLAY_STOP_TIMEOUT, overlay_task).await {
            Ok(Ok(Ok(()))) => tracing::info!("Overlay stopped"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Overlay stopped with error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Overlay task failed"),
            Err(_) => tracing::warn!("Overlay did not stop in time"),
        }
        if let Ok(Err(e)) = download_task.await {
            tracing::warn!(error = %e, "Download service stopped with error");
        }

        tracing::info!("Node shutdown complete");
        Ok(())
    }
}

/// Dial a `host:port` peer.
async fn dial(handle: &NodeHandle, peer: &str) -> anyhow::Result<()> {
    let (host, port) = peer
        .rsplit_once(':')
        .with_context(|| format!("expected host:port, got {}", peer))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad port in {}", peer))?;
    let addr = resolve_peer(host, port).await?;
    let id = handle.connect(addr).await?;
    tracing::info!(peer = %peer, conn = %id, "Connected to startup peer");
    Ok(())
}
