//! Download service.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::download::{not_found_reply, MAX_REQUEST_LEN, OK_PREFIX};
use crate::error::P2pResult;
use crate::files::FileIndex;
use crate::manager::InboundListener;
use crate::protocol::FileId;

/// Serves shared files by ID.
pub struct DownloadService {
    listener: InboundListener,
    files: Arc<FileIndex>,
}

impl DownloadService {
    /// Bind the download port.
    pub async fn bind(addr: SocketAddr, files: Arc<FileIndex>) -> P2pResult<Self> {
        let listener = InboundListener::bind(addr).await?;
        Ok(Self { listener, files })
    }

    /// Bound address.
    pub fn local_addr(&self) -> P2pResult<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept requests until `shutdown` fires. Each request gets its own task.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> P2pResult<()> {
        tracing::info!(addr = %self.local_addr()?, dir = %self.files.dir().display(), "Download service started");
        let mut requests = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Download service shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let files = self.files.clone();
                            requests.spawn(async move {
                                match serve_request(stream, &files).await {
                                    Ok(sent) => tracing::debug!(addr = %addr, bytes = sent, "Download request served"),
                                    Err(e) => tracing::debug!(addr = %addr, error = %e, "Download request failed"),
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Download accept error");
                        }
                    }
                }

                // Reap finished requests so the set does not grow
                Some(_) = requests.join_next(), if !requests.is_empty() => {}
            }
        }

        requests.shutdown().await;
        Ok(())
    }
}

/// Answer one download request on `stream`. Returns the number of file
/// bytes sent, zero for a refusal.
pub async fn serve_request<S>(stream: S, files: &FileIndex) -> P2pResult<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);

    let mut line = Vec::new();
    (&mut stream)
        .take(MAX_REQUEST_LEN as u64)
        .read_until(b'\n', &mut line)
        .await?;
    let raw = String::from_utf8_lossy(&line);
    let requested = raw.trim_end_matches(|c| c == '\r' || c == '\n');

    let path = match requested.parse::<FileId>() {
        Ok(id) => files.lookup(&id).await,
        Err(e) => {
            tracing::debug!(request = requested, error = %e, "Malformed download request");
            None
        }
    };

    let sent = match path {
        Some(path) => match tokio::fs::File::open(&path).await {
            Ok(mut file) => {
                tracing::info!(id = requested, file = %path.display(), "Sending file");
                stream.write_all(OK_PREFIX).await?;
                tokio::io::copy(&mut file, &mut stream).await?
            }
            Err(e) => {
                tracing::info!(id = requested, error = %e, "Indexed file unreadable");
                stream.write_all(not_found_reply(requested).as_bytes()).await?;
                0
            }
        },
        None => {
            tracing::info!(id = requested, "Requested file not found");
            stream.write_all(not_found_reply(requested).as_bytes()).await?;
            0
        }
    };

    stream.shutdown().await?;
    Ok(sent)
}
