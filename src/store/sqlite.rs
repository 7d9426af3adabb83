use std::future::Future;
use std::path::Path;

use log::{debug, info};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use uuid::Uuid;

use super::{RecordStore, StoreConfig, crud};
use crate::error::{Error, Result};
use crate::query::CandidateQuery;
use crate::record::{Hit, NewRecord, RecordId, StoredRecord};

/// 基于 SQLite 的记录存储
pub struct SqliteStore {
    pool: SqlitePool,
    config: StoreConfig,
}

impl SqliteStore {
    /// 打开数据库，不存在时创建并执行迁移
    pub async fn open(filename: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let filename = filename.as_ref();
        info!("初始化数据库连接: {}", filename.display());

        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::StoreUnavailable(format!("无法创建数据库目录: {e}")))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.timeout)
            .foreign_keys(true)
            .filename(filename)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .acquire_timeout(config.timeout)
            .connect_with(options)
            .await?;

        info!("检查数据库迁移");
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// 共享同一个连接池，使用不同的存储配置
    pub fn with_config(&self, config: StoreConfig) -> Self {
        Self { pool: self.pool.clone(), config }
    }

    async fn timed<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        super::timed(self.config.timeout, fut).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl RecordStore for SqliteStore {
    async fn search(&self, query: &CandidateQuery) -> Result<Vec<Hit>> {
        let hits = self.timed(crud::search(&self.pool, query, self.config.size)).await?;
        debug!("粗筛返回 {} 个候选", hits.len());
        Ok(hits)
    }

    async fn insert(&self, record: NewRecord) -> Result<RecordId> {
        let id = RecordId(Uuid::new_v4().to_string());
        self.timed(async {
            let mut tx = self.pool.begin().await?;
            let found = record.signature.len();
            let expected = crud::ensure_dimension(&mut tx, found).await?;
            if expected != found {
                return Err(Error::DimensionMismatch { expected, found });
            }
            crud::add_record(&mut tx, &id, &record).await?;
            tx.commit().await?;
            Ok::<_, Error>(())
        })
        .await?;
        Ok(id)
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        self.timed(async {
            let mut tx = self.pool.begin().await?;
            let existed = crud::delete_record(&mut tx, id).await?;
            tx.commit().await?;
            Ok::<_, Error>(existed)
        })
        .await
    }

    async fn find_by_key(&self, key: &str) -> Result<Vec<StoredRecord>> {
        self.timed(crud::get_records_by_key(&self.pool, key)).await
    }

    async fn dimension(&self) -> Result<Option<usize>> {
        self.timed(crud::get_dimension(&self.pool)).await
    }

    async fn count(&self) -> Result<u64> {
        self.timed(crud::count_records(&self.pool)).await
    }
}
