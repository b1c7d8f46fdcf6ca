//! Download client.

use std::net::SocketAddr;
use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::DEFAULT_CONNECT_TIMEOUT;
use crate::download::OK_PREFIX;
use crate::error::{P2pError, P2pResult};
use crate::manager::connect_to_peer;
use crate::protocol::FileId;

/// Fetch file `id` from the download service at `addr` into `dest`.
///
/// Returns the number of bytes written. A refusal from the service comes
/// back as [`P2pError::DownloadRefused`] carrying the service's text, and
/// `dest` is left untouched.
pub async fn download(addr: SocketAddr, id: FileId, dest: &Path) -> P2pResult<u64> {
    let mut stream = connect_to_peer(addr, DEFAULT_CONNECT_TIMEOUT).await?;
    stream.write_all(format!("{}\n", id).as_bytes()).await?;
    stream.flush().await?;

    let mut prefix = Vec::with_capacity(OK_PREFIX.len());
    (&mut stream)
        .take(OK_PREFIX.len() as u64)
        .read_to_end(&mut prefix)
        .await?;

    if prefix.as_slice() != OK_PREFIX {
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await?;
        prefix.extend_from_slice(&rest);
        let text = String::from_utf8_lossy(&prefix).into_owned();
        tracing::debug!(addr = %addr, id = %id, reply = %text, "Download refused");
        return Err(P2pError::DownloadRefused(text));
    }

    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        tracing::warn!(file = %dest.display(), "Overwriting existing file");
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let received = tokio::io::copy(&mut stream, &mut file).await?;
    file.flush().await?;

    tracing::info!(addr = %addr, id = %id, file = %dest.display(), bytes = received, "Download complete");
    Ok(received)
}
