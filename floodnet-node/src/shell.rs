//! Interactive command shell.
//!
//! Reads one command per line:
//!
//! ```text
//! connect <host> <port>
//! download <host> <port> <fileid> <name>
//! exit
//! <word>                      search the mesh for <word>
//! <blank line>                probe: every reachable node answers
//! ```
//!
//! Answers to searches are printed as they arrive, between commands.

use std::ffi::OsStr;
use std::path::Path;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use floodnet_p2p::download::download;
use floodnet_p2p::manager::resolve_peer;
use floodnet_p2p::{FileId, NodeHandle, SearchReport};

const PROMPT: &str = "> ";

/// One parsed shell command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Dial a peer.
    Connect { host: String, port: u16 },
    /// Fetch a file into the shared directory.
    Download {
        host: String,
        port: u16,
        file_id: FileId,
        name: String,
    },
    /// Search the mesh.
    Search(String),
    /// Leave the shell and shut the node down.
    Exit,
}

impl Command {
    /// Parse one input line. A blank line is an empty search.
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => Command::Search(String::new()),
            [word] if word.eq_ignore_ascii_case("exit") => Command::Exit,
            ["connect", host, port] => Command::Connect {
                host: host.to_string(),
                port: parse_port(port)?,
            },
            ["connect", ..] => bail!("Bad connect command: expected connect <host> <port>"),
            ["download", host, port, file_id, name] => Command::Download {
                host: host.to_string(),
                port: parse_port(port)?,
                file_id: file_id
                    .parse()
                    .with_context(|| format!("Bad File ID: {}", file_id))?,
                name: plain_file_name(name)?,
            },
            ["download", ..] => {
                bail!("Bad download command: expected download <host> <port> <fileid> <name>")
            }
            [query] => Command::Search(query.to_string()),
            _ => bail!("Unknown command: {}", line.trim()),
        };
        Ok(command)
    }
}

fn parse_port(text: &str) -> anyhow::Result<u16> {
    text.parse()
        .with_context(|| format!("Bad port: {}", text))
}

fn plain_file_name(name: &str) -> anyhow::Result<String> {
    match Path::new(name).file_name() {
        Some(file_name) if file_name == OsStr::new(name) => Ok(name.to_string()),
        _ => bail!("Bad file name: {}", name),
    }
}

/// Why the shell stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellExit {
    /// The operator typed `exit`.
    Exit,
    /// Input reached end of file.
    InputClosed,
}

/// Run the command loop until `exit` or end of input.
///
/// Command failures are printed and the loop continues; only failing to
/// read input or write output ends it with an error.
pub async fn run_shell<R, W>(
    input: R,
    output: &mut W,
    handle: &NodeHandle,
    mut reports: mpsc::UnboundedReceiver<SearchReport>,
) -> anyhow::Result<ShellExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut reports_open = true;
    say(output, PROMPT).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => return Ok(ShellExit::InputClosed),
                };

                match Command::parse(&line) {
                    Ok(Command::Exit) => {
                        say(output, "Exiting program...\n").await?;
                        return Ok(ShellExit::Exit);
                    }
                    Ok(command) => {
                        tracing::debug!(?command, "Running shell command");
                        match execute(command, handle).await {
                            Ok(Some(message)) => say(output, &format!("{}\n", message)).await?,
                            Ok(None) => {}
                            Err(e) => say(output, &format!("Error: {:#}\n", e)).await?,
                        }
                    }
                    Err(e) => say(output, &format!("{:#}\n", e)).await?,
                }
                say(output, PROMPT).await?;
            }

            report = reports.recv(), if reports_open => {
                match report {
                    Some(report) => say(output, &format!("\n{}\n{}", report, PROMPT)).await?,
                    None => reports_open = false,
                }
            }
        }
    }
}

async fn execute(command: Command, handle: &NodeHandle) -> anyhow::Result<Option<String>> {
    match command {
        Command::Connect { host, port } => {
            let addr = resolve_peer(&host, port).await?;
            let id = handle
                .connect(addr)
                .await
                .with_context(|| format!("Unable to connect to {}", addr))?;
            Ok(Some(format!("Connected to {} ({})", addr, id)))
        }
        Command::Download {
            host,
            port,
            file_id,
            name,
        } => {
            let addr = resolve_peer(&host, port).await?;
            let dest = handle.shared_dir().join(&name);
            let bytes = download(addr, file_id, &dest)
                .await
                .with_context(|| format!("Download of {} from {} failed", file_id, addr))?;
            Ok(Some(format!("Downloaded {} bytes to {}", bytes, dest.display())))
        }
        Command::Search(query) => {
            let (_, sent) = handle
                .search(&query)
                .await
                .context("Unable to send search request")?;
            if sent == 0 {
                Ok(Some("No connections to search".to_string()))
            } else {
                Ok(None)
            }
        }
        Command::Exit => Ok(None),
    }
}

async fn say<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> anyhow::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}
