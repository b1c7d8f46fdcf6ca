//! Search overlay node orchestrator.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::P2pConfig;
use crate::error::P2pResult;
use crate::files::FileIndex;
use crate::manager::{connect_to_peer, InboundListener};
use crate::peer::{spawn_connection, ConnectionDirection, ConnectionId, ConnectionInfo};
use crate::protocol::MessageId;
use crate::routing::{RoutingEngine, SearchReport};

type TaskMap = Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>>;

/// Clonable handle for driving a running node: dialing peers and starting
/// searches.
#[derive(Clone)]
pub struct NodeHandle {
    engine: Arc<RoutingEngine>,
    tasks: TaskMap,
    reader_shutdown: broadcast::Sender<()>,
}

impl NodeHandle {
    /// Dial a peer and add the connection to the mesh.
    pub async fn connect(&self, addr: SocketAddr) -> P2pResult<ConnectionId> {
        let stream = connect_to_peer(addr, self.engine.config().connect_timeout).await?;
        let (reader, writer) = stream.into_split();

        let (id, task) = spawn_connection(
            reader,
            writer,
            addr,
            ConnectionDirection::Outbound,
            self.engine.clone(),
            self.reader_shutdown.subscribe(),
        )
        .await;
        track(&self.tasks, id, task).await;
        Ok(id)
    }

    /// Start a search for `query`. Returns the search ID and how many
    /// connections it was sent to.
    pub async fn search(&self, query: &str) -> P2pResult<(MessageId, usize)> {
        self.engine.originate(query).await
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.engine.registry().len().await
    }

    /// Live connections, ordered by ID.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.engine.registry().infos().await
    }

    /// Directory this node shares.
    pub fn shared_dir(&self) -> &Path {
        self.engine.files().dir()
    }

    /// The node's file index.
    pub fn files(&self) -> Arc<FileIndex> {
        self.engine.files().clone()
    }
}

async fn track(tasks: &TaskMap, id: ConnectionId, task: JoinHandle<()>) {
    let mut tasks = tasks.lock().await;
    tasks.retain(|_, handle| !handle.is_finished());
    tasks.insert(id, task);
}

/// Search overlay node.
pub struct FloodNode {
    /// Node configuration.
    config: Arc<P2pConfig>,
    /// Routing state shared with every connection task.
    engine: Arc<RoutingEngine>,
    /// Connection tasks, for graceful shutdown.
    tasks: TaskMap,
    /// Tells every reader loop to stop.
    reader_shutdown: broadcast::Sender<()>,
    /// Shutdown signal receiver.
    shutdown_rx: Option<mpsc::Receiver<()>>,
    /// Shutdown signal sender (for cloning).
    shutdown_tx: mpsc::Sender<()>,
    /// Channel to send the bound address when the node starts.
    bound_addr_tx: Option<oneshot::Sender<SocketAddr>>,
    /// Answers to local searches, until someone takes them.
    reports_rx: Option<mpsc::UnboundedReceiver<SearchReport>>,
}

impl FloodNode {
    /// Create a node. Fails if the shared directory cannot be indexed.
    pub async fn new(config: P2pConfig) -> P2pResult<Self> {
        let files = Arc::new(FileIndex::open(&config.shared_dir).await?);
        Ok(Self::with_file_index(config, files).await)
    }

    /// Create a node over an index that is already open, so the download
    /// service can serve the same file IDs the node advertises.
    pub async fn with_file_index(config: P2pConfig, files: Arc<FileIndex>) -> Self {
        tracing::info!(dir = %files.dir().display(), files = files.len().await, "Sharing directory");

        let config = Arc::new(config);
        let (report_tx, reports_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(RoutingEngine::new(config.clone(), files, report_tx));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (reader_shutdown, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            reader_shutdown,
            shutdown_rx: Some(shutdown_rx),
            shutdown_tx,
            bound_addr_tx: None,
            reports_rx: Some(reports_rx),
        }
    }

    /// Get a oneshot receiver that will receive the bound address when the node starts.
    /// This is useful for tests that need to know the actual port when using port 0.
    pub fn bound_addr_receiver(&mut self) -> oneshot::Receiver<SocketAddr> {
        let (tx, rx) = oneshot::channel();
        self.bound_addr_tx = Some(tx);
        rx
    }

    /// Get the shutdown sender for external shutdown signals.
    pub fn shutdown_handle(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Get a handle for dialing peers and starting searches.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            engine: self.engine.clone(),
            tasks: self.tasks.clone(),
            reader_shutdown: self.reader_shutdown.clone(),
        }
    }

    /// Take the stream of answers to this node's own searches.
    /// Only the first call gets it; reports are dropped if nobody takes it
    /// before [`run`](Self::run).
    pub fn reports(&mut self) -> Option<mpsc::UnboundedReceiver<SearchReport>> {
        self.reports_rx.take()
    }

    /// Run the accept loop until shut down.
    pub async fn run(mut self) -> P2pResult<()> {
        drop(self.reports_rx.take());

        let listener = InboundListener::bind(self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Node listening");

        if let Some(tx) = self.bound_addr_tx.take() {
            let _ = tx.send(local_addr);
        }

        let mut shutdown_rx = match self.shutdown_rx.take() {
            Some(rx) => rx,
            None => return Ok(()),
        };

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Node shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let (reader, writer) = stream.into_split();
                            let (id, task) = spawn_connection(
                                reader,
                                writer,
                                addr,
                                ConnectionDirection::Inbound,
                                self.engine.clone(),
                                self.reader_shutdown.subscribe(),
                            )
                            .await;
                            track(&self.tasks, id, task).await;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept error");
                        }
                    }
                }
            }
        }

        self.shutdown_connections().await;
        Ok(())
    }

    /// Close every connection and wait for its task, aborting any that
    /// outlive the grace period.
    async fn shutdown_connections(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain().map(|(_, h)| h).collect();
        tracing::info!(count = handles.len(), "Shutting down connections");

        self.engine.registry().disconnect_all().await;
        let _ = self.reader_shutdown.send(());

        for mut handle in handles {
            if tokio::time::timeout(self.config.shutdown_grace, &mut handle).await.is_err() {
                tracing::debug!("Connection task did not finish in time, aborting");
                handle.abort();
            }
        }
    }
}
