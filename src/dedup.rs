use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::Result;
use crate::metrics;
use crate::record::{NewRecord, RecordId};
use crate::store::RecordStore;

/// 按 key 加锁，保证同一个 key 同一时间只有一个写入者
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// 持有期间其他任务无法获取同一个 key 的锁
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.to_owned()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        KeyGuard { owner: self, key: key.to_owned(), lock, guard: Some(guard) }
    }

    /// 当前存在的锁数量
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.owner.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // 表中一份 + 自己一份，说明没有其他任务在等待
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// 去重器，维护每个 key 只有一条记录
///
/// 先删除再写入的过程在同一个 key 锁内完成，同一进程内的并发写入会被串行化。
/// 读者仍可能在删除与写入之间观察到该 key 没有记录。
#[derive(Default)]
pub struct Deduplicator {
    locks: KeyLocks,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// 删除所有使用该 key 的记录，返回成功删除的数量
    pub async fn delete_duplicates<S: RecordStore>(&self, store: &S, key: &str) -> Result<usize> {
        let _guard = self.locks.lock(key).await;
        delete_all(store, key).await
    }

    /// 删除该 key 的旧记录后写入新记录，返回 (删除数量, 新记录 ID)
    pub async fn insert_unique<S: RecordStore>(
        &self,
        store: &S,
        record: NewRecord,
    ) -> Result<(usize, RecordId)> {
        let _guard = self.locks.lock(&record.key).await;
        let removed = delete_all(store, &record.key).await?;
        let id = store.insert(record).await?;
        Ok((removed, id))
    }
}

/// 单条记录删除失败只记录日志，不影响后续流程
async fn delete_all<S: RecordStore>(store: &S, key: &str) -> Result<usize> {
    let records = store.find_by_key(key).await?;
    let mut removed = 0;
    for record in records {
        match store.delete(&record.id).await {
            Ok(true) => removed += 1,
            Ok(false) => debug!("记录已被删除: {}", record.id),
            Err(e) => warn!("删除重复记录 {} 失败: {}", record.id, e),
        }
    }
    if removed > 0 {
        debug!("删除了 {} 条 key 为 {} 的记录", removed, key);
        metrics::inc_dedup_deleted(removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::Utc;

    use super::*;
    use crate::error::Error;
    use crate::query::CandidateQuery;
    use crate::record::{Hit, StoredRecord};
    use crate::store::{MemoryStore, StoreConfig};

    fn new_record(key: &str) -> NewRecord {
        NewRecord {
            key: key.to_string(),
            signature: vec![0.1, 0.2, 0.3, 0.4],
            words: Default::default(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// 第一次删除总是失败
    struct FlakyStore {
        inner: MemoryStore,
        failed: AtomicBool,
    }

    impl RecordStore for FlakyStore {
        async fn search(&self, query: &CandidateQuery) -> Result<Vec<Hit>> {
            self.inner.search(query).await
        }

        async fn insert(&self, record: NewRecord) -> Result<RecordId> {
            self.inner.insert(record).await
        }

        async fn delete(&self, id: &RecordId) -> Result<bool> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(Error::StoreUnavailable("boom".to_string()));
            }
            self.inner.delete(id).await
        }

        async fn find_by_key(&self, key: &str) -> Result<Vec<StoredRecord>> {
            self.inner.find_by_key(key).await
        }

        async fn dimension(&self) -> Result<Option<usize>> {
            self.inner.dimension().await
        }

        async fn count(&self) -> Result<u64> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn test_insert_unique_replaces() {
        let store = MemoryStore::default();
        let dedup = Deduplicator::new();
        for _ in 0..5 {
            dedup.insert_unique(&store, new_record("a")).await.unwrap();
        }
        dedup.insert_unique(&store, new_record("b")).await.unwrap();
        assert_eq!(store.find_by_key("a").await.unwrap().len(), 1);
        assert_eq!(store.count().await.unwrap(), 2);
        assert!(dedup.locks().is_empty());
    }

    #[tokio::test]
    async fn test_delete_duplicates_counts() {
        let store = MemoryStore::default();
        for _ in 0..3 {
            store.insert(new_record("a")).await.unwrap();
        }
        let dedup = Deduplicator::new();
        assert_eq!(dedup.delete_duplicates(&store, "a").await.unwrap(), 3);
        assert_eq!(dedup.delete_duplicates(&store, "a").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_abort_insert() {
        let store = FlakyStore { inner: MemoryStore::default(), failed: AtomicBool::new(false) };
        store.insert(new_record("a")).await.unwrap();
        store.insert(new_record("a")).await.unwrap();

        let dedup = Deduplicator::new();
        let (removed, _) = dedup.insert_unique(&store, new_record("a")).await.unwrap();
        assert_eq!(removed, 1);
        // 删除失败的那条仍然存在
        assert_eq!(store.find_by_key("a").await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_converge() {
        let store = Arc::new(MemoryStore::new(StoreConfig::default()));
        let dedup = Arc::new(Deduplicator::new());

        let tasks = (0..32)
            .map(|_| {
                let store = store.clone();
                let dedup = dedup.clone();
                tokio::spawn(async move {
                    dedup.insert_unique(&*store, new_record("same")).await.unwrap();
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.find_by_key("same").await.unwrap().len(), 1);
        assert!(dedup.locks().is_empty());
    }

    #[tokio::test]
    async fn test_key_locks_are_per_key() {
        let locks = KeyLocks::default();
        let a = locks.lock("a").await;
        let b = locks.lock("b").await;
        assert_eq!(locks.len(), 2);
        drop(a);
        assert_eq!(locks.len(), 1);
        drop(b);
        assert!(locks.is_empty());
    }
}
