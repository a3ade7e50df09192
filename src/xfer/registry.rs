//! In-memory transfer status table.
//!
//! Status creation and mutation take the write lock; polls take the read lock
//! and receive a cloned snapshot, so a reader never observes a half-applied
//! update. Each entry has a single writer: the task that owns its
//! [`TransferHandle`].
//!
//! Terminal entries are evicted only by [`StatusRegistry::sweep`], which the
//! server calls from a periodic task, never from `create` or `update`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use tracing::info;

use super::types::{Direction, TransferStatus};
use crate::error::{Result, XferError};

/// Process-wide sequence to uniquify ids minted within the same clock tick.
static ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Eviction limits. `None` disables the corresponding rule.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryConfig {
    /// Remove terminal entries this long after they finished.
    pub status_ttl: Option<Duration>,
    /// Keep at most this many entries, dropping the oldest terminal ones first.
    pub max_statuses: Option<usize>,
}

struct Record {
    status: TransferStatus,
    created: Instant,
    finished: Option<Instant>,
}

/// Owns every transfer status known to the server.
pub struct StatusRegistry {
    transfers: RwLock<HashMap<String, Record>>,
    config: RegistryConfig,
}

impl StatusRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            transfers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a new running transfer under a freshly minted id.
    pub async fn start(self: &Arc<Self>, direction: Direction) -> TransferHandle {
        self.create(generate_transfer_id(), direction).await
    }

    /// Register a new running transfer under `id`, replacing any previous entry.
    pub async fn create(self: &Arc<Self>, id: String, direction: Direction) -> TransferHandle {
        let record = Record {
            status: TransferStatus::new(id.clone(), direction),
            created: Instant::now(),
            finished: None,
        };
        self.transfers.write().await.insert(id.clone(), record);
        TransferHandle {
            registry: Arc::clone(self),
            id,
        }
    }

    /// Snapshot of one transfer.
    pub async fn get(&self, id: &str) -> Result<TransferStatus> {
        self.transfers
            .read()
            .await
            .get(id)
            .map(|r| r.status.clone())
            .ok_or_else(|| XferError::TransferNotFound(id.to_string()))
    }

    /// Apply `mutate` to one transfer under the write lock.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TransferStatus),
    {
        let mut transfers = self.transfers.write().await;
        let record = transfers
            .get_mut(id)
            .ok_or_else(|| XferError::TransferNotFound(id.to_string()))?;
        apply(record, mutate);
        Ok(())
    }

    /// Same as [`StatusRegistry::update`] for callers on a blocking thread.
    ///
    /// Must not be called from async context.
    pub fn update_blocking<F>(&self, id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TransferStatus),
    {
        let mut transfers = self.transfers.blocking_write();
        let record = transfers
            .get_mut(id)
            .ok_or_else(|| XferError::TransferNotFound(id.to_string()))?;
        apply(record, mutate);
        Ok(())
    }

    /// Snapshots of every transfer, newest first.
    pub async fn list(&self) -> Vec<TransferStatus> {
        let transfers = self.transfers.read().await;
        let mut records: Vec<&Record> = transfers.values().collect();
        records.sort_by(|a, b| b.created.cmp(&a.created));
        records.into_iter().map(|r| r.status.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.transfers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Evict terminal entries per [`RegistryConfig`]. Returns removed ids.
    pub async fn sweep(&self) -> Vec<String> {
        let mut transfers = self.transfers.write().await;
        let mut removed = Vec::new();

        if let Some(ttl) = self.config.status_ttl {
            let expired: Vec<String> = transfers
                .iter()
                .filter(|(_, r)| r.finished.is_some_and(|f| f.elapsed() > ttl))
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                transfers.remove(&id);
                removed.push(id);
            }
        }

        if let Some(max) = self.config.max_statuses {
            if transfers.len() > max {
                let mut finished: Vec<(Instant, String)> = transfers
                    .iter()
                    .filter(|(_, r)| r.finished.is_some())
                    .map(|(id, r)| (r.created, id.clone()))
                    .collect();
                finished.sort();
                let excess = transfers.len() - max;
                for (_, id) in finished.into_iter().take(excess) {
                    transfers.remove(&id);
                    removed.push(id);
                }
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), remaining = transfers.len(), "Swept transfer statuses");
        }
        removed
    }
}

fn apply<F: FnOnce(&mut TransferStatus)>(record: &mut Record, mutate: F) {
    mutate(&mut record.status);
    if record.finished.is_none() && record.status.is_terminal() {
        record.finished = Some(Instant::now());
    }
}

/// Write access to one registry entry, held by the task performing the transfer.
#[derive(Clone)]
pub struct TransferHandle {
    registry: Arc<StatusRegistry>,
    id: String,
}

impl TransferHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn update<F: FnOnce(&mut TransferStatus)>(&self, mutate: F) -> Result<()> {
        self.registry.update(&self.id, mutate).await
    }

    pub fn update_blocking<F: FnOnce(&mut TransferStatus)>(&self, mutate: F) -> Result<()> {
        self.registry.update_blocking(&self.id, mutate)
    }

    pub async fn snapshot(&self) -> Result<TransferStatus> {
        self.registry.get(&self.id).await
    }
}

/// Mint a transfer id from the wall clock in nanoseconds plus a sequence number.
pub fn generate_transfer_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    let seq = ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("transfer_{nanos}_{seq}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xfer::types::TransferState;

    fn registry(config: RegistryConfig) -> Arc<StatusRegistry> {
        Arc::new(StatusRegistry::new(config))
    }

    #[tokio::test]
    async fn create_get_update() {
        let reg = registry(RegistryConfig::default());
        let handle = reg.start(Direction::Upload).await;
        handle.update(|s| s.set_totals(2, 20)).await.unwrap();
        handle.update(|s| s.record_file(10)).await.unwrap();

        let st = reg.get(handle.id()).await.unwrap();
        assert_eq!(st.status, TransferState::Running);
        assert_eq!(st.processed_files, 1);
        assert!((st.progress - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn missing_id_is_not_found() {
        let reg = registry(RegistryConfig::default());
        assert!(matches!(
            reg.get("transfer_0").await,
            Err(XferError::TransferNotFound(_))
        ));
        assert!(reg.update("transfer_0", |s| s.complete()).await.is_err());
    }

    #[tokio::test]
    async fn terminal_state_never_changes() {
        let reg = registry(RegistryConfig::default());
        let handle = reg.start(Direction::Download).await;
        handle.update(|s| s.complete()).await.unwrap();
        handle.update(|s| s.fail("late")).await.unwrap();
        let st = handle.snapshot().await.unwrap();
        assert_eq!(st.status, TransferState::Completed);
        assert!(st.error.is_none());
    }

    #[test]
    fn ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..1000).map(|_| generate_transfer_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.starts_with("transfer_")));
    }

    #[tokio::test]
    async fn sweep_without_limits_keeps_everything() {
        let reg = registry(RegistryConfig::default());
        for _ in 0..3 {
            let h = reg.start(Direction::Upload).await;
            h.update(|s| s.complete()).await.unwrap();
        }
        assert!(reg.sweep().await.is_empty());
        assert_eq!(reg.len().await, 3);
    }

    #[tokio::test]
    async fn sweep_ttl_removes_only_terminal() {
        let reg = registry(RegistryConfig {
            status_ttl: Some(Duration::ZERO),
            max_statuses: None,
        });
        let done = reg.start(Direction::Upload).await;
        done.update(|s| s.fail("boom")).await.unwrap();
        let running = reg.start(Direction::Upload).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let removed = reg.sweep().await;
        assert_eq!(removed, vec![done.id().to_string()]);
        assert!(reg.get(running.id()).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_cap_drops_oldest_terminal_first() {
        let reg = registry(RegistryConfig {
            status_ttl: None,
            max_statuses: Some(2),
        });
        let mut ids = Vec::new();
        for _ in 0..3 {
            let h = reg.start(Direction::Download).await;
            h.update(|s| s.complete()).await.unwrap();
            ids.push(h.id().to_string());
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let live = reg.start(Direction::Upload).await;

        let removed = reg.sweep().await;
        assert_eq!(removed, ids[..2].to_vec());
        assert_eq!(reg.len().await, 2);
        assert!(reg.get(live.id()).await.is_ok());
    }

    #[tokio::test]
    async fn blocking_update_from_blocking_thread() {
        let reg = registry(RegistryConfig::default());
        let handle = reg.start(Direction::Download).await;
        let h2 = handle.clone();
        tokio::task::spawn_blocking(move || h2.update_blocking(|s| s.record_file(7)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.snapshot().await.unwrap().processed_size, 7);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let reg = registry(RegistryConfig::default());
        let a = reg.start(Direction::Upload).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        let b = reg.start(Direction::Upload).await;
        let ids: Vec<String> = reg.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b.id().to_string(), a.id().to_string()]);
    }
}
