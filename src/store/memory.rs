use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{RecordStore, StoreConfig};
use crate::error::{Error, Result};
use crate::query::CandidateQuery;
use crate::record::{Hit, NewRecord, RecordId, StoredRecord};
use crate::signature::Words;

#[derive(Default)]
struct MemoryState {
    /// 按写入顺序排列
    records: Vec<(StoredRecord, Words)>,
    dimension: Option<usize>,
}

/// 进程内的记录存储，语义与 [`SqliteStore`](super::SqliteStore) 保持一致
///
/// 操作本身不涉及 IO，`StoreConfig::timeout` 限制的是等待读写锁的时间。
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    config: StoreConfig,
}

impl MemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { state: RwLock::default(), config }
    }

    async fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>> {
        super::timed(self.config.timeout, async { Ok(self.state.read().await) }).await
    }

    async fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>> {
        super::timed(self.config.timeout, async { Ok(self.state.write().await) }).await
    }
}

impl RecordStore for MemoryStore {
    async fn search(&self, query: &CandidateQuery) -> Result<Vec<Hit>> {
        let state = self.read().await?;
        let min = query.minimum_should_match();
        let mut hits = state
            .records
            .iter()
            .filter(|(record, _)| query.accepts(record))
            .map(|(record, words)| (query.score(words), record))
            .filter(|(score, _)| *score >= min)
            .map(|(score, record)| Hit { score: score as f32, record: record.clone() })
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(self.config.size);
        Ok(hits)
    }

    async fn insert(&self, record: NewRecord) -> Result<RecordId> {
        let mut state = self.write().await?;
        let found = record.signature.len();
        let expected = *state.dimension.get_or_insert(found);
        if expected != found {
            return Err(Error::DimensionMismatch { expected, found });
        }

        let id = RecordId(Uuid::new_v4().to_string());
        let stored = StoredRecord {
            id: id.clone(),
            key: record.key,
            signature: record.signature,
            metadata: record.metadata,
            created_at: record.created_at,
        };
        state.records.push((stored, record.words));
        Ok(id)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        let mut state = self.write().await?;
        let before = state.records.len();
        state.records.retain(|(record, _)| &record.id != id);
        Ok(state.records.len() != before)
    }

    async fn find_by_key(&self, key: &str) -> Result<Vec<StoredRecord>> {
        let state = self.read().await?;
        Ok(state
            .records
            .iter()
            .filter(|(record, _)| record.key == key)
            .map(|(record, _)| record.clone())
            .collect())
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.read().await?.dimension)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.read().await?.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let config = StoreConfig { timeout: Duration::from_millis(10), ..Default::default() };
        let store = MemoryStore::new(config);
        assert_eq!(store.count().await.unwrap(), 0);

        let guard = store.state.write().await;
        assert!(matches!(store.count().await, Err(Error::StoreUnavailable(_))));
        assert!(matches!(store.find_by_key("a").await, Err(Error::StoreUnavailable(_))));
        drop(guard);

        assert_eq!(store.dimension().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_searcher_times_out_on_busy_store() {
        use crate::{ImageSearcher, ImageSource, SearchOptions};

        let config = StoreConfig { timeout: Duration::from_millis(10), ..Default::default() };
        let searcher = ImageSearcher::builder(MemoryStore::new(config)).build();
        let image = ImageSource::Bytes(b"[0.5, -0.5, 0.25, -0.25]".to_vec());

        let guard = searcher.store().state.write().await;
        let result = searcher.add_image("mona_lisa", &image, None).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        let result = searcher.search_image(&image, &SearchOptions::default()).await;
        assert!(matches!(result, Err(Error::StoreUnavailable(_))));
        drop(guard);

        assert_eq!(searcher.count().await.unwrap(), 0);
        assert!(searcher.store().find_by_key("mona_lisa").await.unwrap().is_empty());
    }
}
