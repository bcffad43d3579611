use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::listing::Source;
use crate::storage::{NoveltyState, StateBackend};

/// Source of truth for "have we seen this listing before".
///
/// Every mutation is written through to the backend while the write lock is
/// held, so at most one save is in flight. A failed save leaves the in-memory
/// state untouched and is returned to the caller.
#[derive(Clone)]
pub struct NoveltyTracker {
    inner: Arc<RwLock<NoveltyState>>,
    backend: Arc<dyn StateBackend>,
}

impl NoveltyTracker {
    pub async fn load(backend: Arc<dyn StateBackend>) -> Self {
        let state = backend.load().await;
        Self::with_state(state, backend)
    }

    pub fn with_state(state: NoveltyState, backend: Arc<dyn StateBackend>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
            backend,
        }
    }

    /// Ids already seen are never new. Otherwise an older timestamp than the
    /// source's high-water-mark is stale; an equal one still counts as new.
    pub async fn is_new(
        &self,
        source: Source,
        id: &str,
        created_at: Option<DateTime<Utc>>,
    ) -> bool {
        let inner = self.inner.read().await;
        is_new_in(&inner, source, id, created_at)
    }

    pub async fn mark_seen<I, S>(&self, source: Source, ids: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = self.inner.write().await;
        let mut next = inner.clone();
        let set = next.seen_ids_by_source.entry(source).or_default();
        let before = set.len();
        set.extend(ids.into_iter().map(Into::into));
        let added = set.len() - before;
        self.commit(&mut inner, next).await?;
        debug!(%source, added, "marked listings as seen");
        Ok(())
    }

    pub async fn update_last_date(
        &self,
        source: Source,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let Some(timestamp) = timestamp else {
            return Ok(());
        };
        let mut inner = self.inner.write().await;
        let current = inner.last_date_by_source.get(&source).copied().flatten();
        if current.is_some_and(|hwm| timestamp <= hwm) {
            return Ok(());
        }
        let mut next = inner.clone();
        next.last_date_by_source.insert(source, Some(timestamp));
        self.commit(&mut inner, next).await?;
        debug!(%source, %timestamp, "advanced high-water-mark");
        Ok(())
    }

    pub async fn increment_empty_cycle(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        let mut next = inner.clone();
        next.empty_cycles += 1;
        let count = next.empty_cycles;
        self.commit(&mut inner, next).await?;
        Ok(count)
    }

    pub async fn reset_empty_cycles(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.empty_cycles == 0 {
            return Ok(());
        }
        let mut next = inner.clone();
        next.empty_cycles = 0;
        self.commit(&mut inner, next).await
    }

    // The in-memory state only moves once the durable write went through.
    async fn commit(
        &self,
        current: &mut NoveltyState,
        next: NoveltyState,
    ) -> Result<(), StoreError> {
        self.backend.save(&next).await?;
        *current = next;
        Ok(())
    }

    /// False only before the first baseline has been recorded for any source.
    pub async fn has_any_seen_ids(&self) -> bool {
        !self.inner.read().await.seen_ids_by_source.is_empty()
    }

    pub async fn empty_cycles(&self) -> u64 {
        self.inner.read().await.empty_cycles
    }

    pub async fn last_date(&self, source: Source) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .await
            .last_date_by_source
            .get(&source)
            .copied()
            .flatten()
    }

    pub async fn seen_count(&self, source: Source) -> usize {
        self.inner
            .read()
            .await
            .seen_ids_by_source
            .get(&source)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    pub async fn add_subscriber(&self, chat_id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.chat_ids.contains(&chat_id) {
            return Ok(false);
        }
        let mut next = inner.clone();
        next.chat_ids.insert(chat_id);
        self.commit(&mut inner, next).await?;
        Ok(true)
    }

    pub async fn remove_subscriber(&self, chat_id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.chat_ids.contains(&chat_id) {
            return Ok(false);
        }
        let mut next = inner.clone();
        next.chat_ids.remove(&chat_id);
        self.commit(&mut inner, next).await?;
        Ok(true)
    }

    pub async fn subscribers(&self) -> Vec<i64> {
        self.inner.read().await.chat_ids.iter().copied().collect()
    }

    pub async fn snapshot(&self) -> NoveltyState {
        self.inner.read().await.clone()
    }
}

fn is_new_in(
    state: &NoveltyState,
    source: Source,
    id: &str,
    created_at: Option<DateTime<Utc>>,
) -> bool {
    if state
        .seen_ids_by_source
        .get(&source)
        .is_some_and(|ids| ids.contains(id))
    {
        return false;
    }
    let hwm = state.last_date_by_source.get(&source).copied().flatten();
    match (created_at, hwm) {
        (Some(created_at), Some(hwm)) => created_at >= hwm,
        _ => true,
    }
}
