use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::query::CandidateQuery;
use crate::record::{Hit, NewRecord, RecordId, StoredRecord};

mod crud;
mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 存储层配置，对所有查询生效
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// 单次粗筛最多返回的候选数量
    pub size: usize,
    /// 单次存储请求的超时时间
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { size: 100, timeout: Duration::from_secs(10) }
    }
}

/// 为一次存储请求加上超时限制，超时返回 `StoreUnavailable`
pub(crate) async fn timed<T>(timeout: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, fut).await?
}

/// 记录存储
///
/// 实现需要可以被多个请求并发使用，且不保存任何与单次请求相关的状态。
pub trait RecordStore: Send + Sync {
    /// 执行粗筛查询，按粗筛分数从高到低返回候选，结果中不包含分桶字段
    fn search(&self, query: &CandidateQuery) -> impl Future<Output = Result<Vec<Hit>>> + Send;

    /// 写入一条记录，返回存储分配的 ID
    ///
    /// 签名维度与索引已有维度不一致时返回 `DimensionMismatch`。
    fn insert(&self, record: NewRecord) -> impl Future<Output = Result<RecordId>> + Send;

    /// 删除一条记录，记录不存在时返回 false 而不是报错
    fn delete(&self, id: &RecordId) -> impl Future<Output = Result<bool>> + Send;

    /// 按 key 精确查找，按写入顺序返回
    fn find_by_key(&self, key: &str) -> impl Future<Output = Result<Vec<StoredRecord>>> + Send;

    /// 索引的签名维度，尚未写入任何记录时为 None
    fn dimension(&self) -> impl Future<Output = Result<Option<usize>>> + Send;

    /// 记录总数
    fn count(&self) -> impl Future<Output = Result<u64>> + Send;
}
