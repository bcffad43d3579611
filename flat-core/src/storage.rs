use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::listing::Source;

/// Everything the tracker persists, as one JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NoveltyState {
    // source -> every listing id ever observed there
    #[serde(default, serialize_with = "serialize_sorted_ids")]
    pub seen_ids_by_source: BTreeMap<Source, HashSet<String>>,
    #[serde(default)]
    pub chat_ids: BTreeSet<i64>,
    #[serde(default)]
    pub empty_cycles: u64,
    // source -> newest created_at accepted as new
    #[serde(default)]
    pub last_date_by_source: BTreeMap<Source, Option<DateTime<Utc>>>,
}

fn serialize_sorted_ids<S>(
    seen: &BTreeMap<Source, HashSet<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let sorted: BTreeMap<&Source, BTreeSet<&String>> = seen
        .iter()
        .map(|(source, ids)| (source, ids.iter().collect()))
        .collect();
    sorted.serialize(serializer)
}

/// Durable home of the [`NoveltyState`].
///
/// `load` never fails: a missing or unreadable document yields the empty state.
/// `save` must report every failure so callers never assume an unwritten decision.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn load(&self) -> NoveltyState;
    async fn save(&self, state: &NoveltyState) -> Result<(), StoreError>;
}

/// JSON document on disk, written atomically through a `.json.tmp` sibling.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl StateBackend for JsonFileBackend {
    async fn load(&self) -> NoveltyState {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, starting empty");
                return NoveltyState::default();
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "state file unreadable, starting empty; the next save replaces it"
                );
                return NoveltyState::default();
            }
        };
        match serde_json::from_slice::<NoveltyState>(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "corrupted state file, trying tmp fallback");
                let tmp = self.tmp_path();
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice(&tmp_bytes).unwrap_or_else(|e| {
                        warn!(error = %e, path = %tmp.display(), "tmp state unusable, starting empty");
                        NoveltyState::default()
                    }),
                    Err(_) => NoveltyState::default(),
                }
            }
        }
    }

    async fn save(&self, state: &NoveltyState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Keeps the last saved snapshot in memory. Writes can be made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    snapshot: Mutex<Option<NoveltyState>>,
    saves: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: NoveltyState) -> Self {
        Self {
            snapshot: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    pub async fn snapshot(&self) -> Option<NoveltyState> {
        self.snapshot.lock().await.clone()
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self) -> NoveltyState {
        self.snapshot.lock().await.clone().unwrap_or_default()
    }

    async fn save(&self, state: &NoveltyState) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory backend rejected write",
            )));
        }
        *self.snapshot.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
