//! Shared file index.
//!
//! Maps the names of regular files in the shared directory to compact file
//! IDs. IDs are random and unique within the index, and a name keeps its ID
//! for the lifetime of the index, even across removal and re-creation of the
//! file. The directory is rescanned before every match so newly added files
//! are advertised without a restart.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;

use crate::error::{P2pError, P2pResult};
use crate::protocol::{FileId, FileResult};

#[derive(Debug, Default)]
struct IndexState {
    /// Every name ever seen. Never shrinks.
    by_name: BTreeMap<String, FileId>,
    by_id: HashMap<FileId, String>,
    /// Names found by the latest scan.
    present: HashSet<String>,
}

impl IndexState {
    fn assign(&mut self, name: String) -> FileId {
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let mut id = FileId::random();
        while self.by_id.contains_key(&id) {
            id = FileId::random();
        }
        self.by_id.insert(id, name.clone());
        self.by_name.insert(name, id);
        id
    }

}

/// Index of the files this node shares.
#[derive(Debug)]
pub struct FileIndex {
    dir: PathBuf,
    state: RwLock<IndexState>,
}

impl FileIndex {
    /// Open the index over a shared directory and perform the first scan.
    pub async fn open(dir: impl Into<PathBuf>) -> P2pResult<Self> {
        let dir = dir.into();
        let metadata = tokio::fs::metadata(&dir).await.map_err(|e| {
            P2pError::Io(std::io::Error::new(
                e.kind(),
                format!("shared directory {}: {}", dir.display(), e),
            ))
        })?;
        if !metadata.is_dir() {
            return Err(P2pError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let index = Self {
            dir,
            state: RwLock::new(IndexState::default()),
        };
        index.refresh().await?;
        Ok(index)
    }

    /// Shared directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rescan the directory. Returns the number of files currently present.
    pub async fn refresh(&self) -> P2pResult<usize> {
        let mut names = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => {
                    names.insert(name);
                }
                Err(raw) => {
                    tracing::debug!(name = ?raw, "Skipping file with non-UTF-8 name");
                }
            }
        }

        let mut state = self.state.write().await;
        for name in &names {
            state.assign(name.clone());
        }
        state.present = names;
        Ok(state.present.len())
    }

    /// Files whose names contain `needle`, case-sensitively, in name order.
    ///
    /// The empty needle matches nothing. Names that cannot travel in a
    /// Result (characters outside `[A-Za-z0-9_.-]`) are never advertised.
    pub async fn matches(&self, needle: &str) -> P2pResult<Vec<FileResult>> {
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.refresh().await?;

        let candidates: Vec<(String, FileId)> = {
            let state = self.state.read().await;
            state
                .by_name
                .iter()
                .filter(|(name, _)| state.present.contains(*name) && name.contains(needle))
                .map(|(name, id)| (name.clone(), *id))
                .collect()
        };

        let mut results = Vec::with_capacity(candidates.len());
        for (name, id) in candidates {
            let size = match tokio::fs::metadata(self.dir.join(&name)).await {
                Ok(metadata) => match u32::try_from(metadata.len()) {
                    Ok(size) => size,
                    Err(_) => {
                        tracing::debug!(
                            file = %name,
                            size = metadata.len(),
                            "File too large to advertise"
                        );
                        continue;
                    }
                },
                Err(e) => {
                    tracing::debug!(file = %name, error = %e, "File vanished during match");
                    continue;
                }
            };
            match FileResult::new(id, size, name.as_str()) {
                Ok(result) => results.push(result),
                Err(e) => tracing::debug!(file = %name, error = %e, "File name cannot be advertised"),
            }
        }
        Ok(results)
    }

    /// ID assigned to a file name.
    pub async fn file_id(&self, name: &str) -> Option<FileId> {
        self.state.read().await.by_name.get(name).copied()
    }

    /// Path of the file with the given ID, if that file exists right now.
    pub async fn lookup(&self, id: &FileId) -> Option<PathBuf> {
        let path = {
            let state = self.state.read().await;
            self.dir.join(state.by_id.get(id)?)
        };
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Some(path),
            _ => None,
        }
    }

    /// Number of files present at the latest scan.
    pub async fn len(&self) -> usize {
        self.state.read().await.present.len()
    }

    /// Check if no files were present at the latest scan.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.present.is_empty()
    }
}
