use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::session::SessionManager;
use crate::store::{LedgerStore, StoreError};

/// Compact the ledger once `threshold` appends have accumulated.
/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &LedgerStore, threshold: u64) -> Result<bool, StoreError> {
    let appends = store.appends_since_compact().await?;
    if appends < threshold {
        return Ok(false);
    }
    store.compact().await?;
    info!("compacted ledger after {appends} appends");
    Ok(true)
}

/// Background task that keeps the ledger's WAL short.
pub async fn run_compactor(store: Arc<LedgerStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// Background task that drops sessions past their lifetime.
pub async fn run_session_sweeper(sessions: Arc<SessionManager>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let swept = sessions.sweep_expired(Instant::now());
        if swept > 0 {
            debug!("session sweep: {swept} removed, {} live", sessions.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RestrictionStore;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_housekeeping");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let store = LedgerStore::open(&test_wal_path("threshold.wal")).unwrap();
        let room = store.create_room("A").await.unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let block = store.insert_block(room.id, day).await.unwrap();
        store.delete_block(block).await.unwrap();

        assert!(!compact_if_needed(&store, 10).await.unwrap());
        assert_eq!(store.appends_since_compact().await.unwrap(), 3);
        assert!(compact_if_needed(&store, 3).await.unwrap());
        assert_eq!(store.appends_since_compact().await.unwrap(), 0);
        assert_eq!(store.list_rooms().await.unwrap(), vec![room]);
    }

    #[tokio::test]
    async fn sweeper_drops_idle_sessions() {
        let sessions = Arc::new(SessionManager::new(Duration::from_millis(50)));
        sessions.get_or_create("admin").unwrap();

        let task = tokio::spawn(run_session_sweeper(sessions.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(150)).await;
        task.abort();

        assert!(sessions.get("admin").is_none());
        assert!(sessions.is_empty());
    }
}
