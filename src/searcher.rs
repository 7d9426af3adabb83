use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde_json::Value;
use tokio::task::spawn_blocking;

use crate::clock::{Clock, SystemClock};
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::metrics;
use crate::query::{CandidateQuery, Filter};
use crate::ranker::{self, DEFAULT_DISTANCE_CUTOFF, RankOptions};
use crate::record::{NewRecord, RecordId, SearchMatch, StoredRecord};
use crate::signature::{JsonSignature, Signature, SignatureGenerator, WordsConfig};
use crate::source::{HttpFetcher, ImageSource, SourceFetcher};
use crate::store::RecordStore;

/// 搜索参数
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// 与分桶条件取 AND 的硬性条件
    pub query_filter: Option<Filter>,
    /// 不参与计分的预过滤条件
    pub pre_filter: Option<Filter>,
    /// 距离阈值，范围 [0, 1]
    pub distance_cutoff: f32,
    /// 按距离升序排序，默认保持粗筛顺序
    pub sort_by_distance: bool,
    /// 最多返回的结果数量
    pub limit: Option<usize>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query_filter: None,
            pre_filter: None,
            distance_cutoff: DEFAULT_DISTANCE_CUTOFF,
            sort_by_distance: false,
            limit: None,
        }
    }
}

/// 单次请求所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    BuildingQuery,
    AwaitingStore,
    Ranking,
    Done,
    Failed,
}

/// 跟踪单次请求的阶段变化
struct Flow {
    op: &'static str,
    phase: Phase,
}

impl Flow {
    fn new(op: &'static str) -> Self {
        Self { op, phase: Phase::Idle }
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{}: {:?} -> {:?}", self.op, self.phase, phase);
        self.phase = phase;
    }

    fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.enter(Phase::Done),
            Err(e) => {
                warn!("{} 在 {:?} 阶段失败: {}", self.op, self.phase, e);
                self.enter(Phase::Failed);
            }
        }
        result
    }
}

/// 图片检索入口，外部只通过它访问各个组件
pub struct ImageSearcher<S> {
    store: S,
    generator: Arc<dyn SignatureGenerator>,
    fetcher: Arc<dyn SourceFetcher>,
    clock: Arc<dyn Clock>,
    words: WordsConfig,
    dedup: Deduplicator,
}

impl<S> fmt::Debug for ImageSearcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageSearcher").field("words", &self.words).finish_non_exhaustive()
    }
}

pub struct ImageSearcherBuilder<S> {
    store: S,
    generator: Option<Arc<dyn SignatureGenerator>>,
    fetcher: Arc<dyn SourceFetcher>,
    clock: Arc<dyn Clock>,
    words: WordsConfig,
}

impl<S: RecordStore> ImageSearcherBuilder<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            generator: None,
            fetcher: Arc::new(HttpFetcher::default()),
            clock: Arc::new(SystemClock),
            words: WordsConfig::default(),
        }
    }

    /// 签名生成器，默认读取 JSON 格式的签名
    pub fn generator(mut self, generator: Arc<dyn SignatureGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 分桶参数，需要与生成器使用的参数一致
    pub fn words(mut self, words: WordsConfig) -> Self {
        self.words = words;
        self
    }

    pub fn build(self) -> ImageSearcher<S> {
        let words = self.words;
        ImageSearcher {
            store: self.store,
            generator: self.generator.unwrap_or_else(|| Arc::new(JsonSignature::new(words))),
            fetcher: self.fetcher,
            clock: self.clock,
            words,
            dedup: Deduplicator::new(),
        }
    }
}

impl<S: RecordStore> ImageSearcher<S> {
    pub fn builder(store: S) -> ImageSearcherBuilder<S> {
        ImageSearcherBuilder::new(store)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// 添加图片，同一个 key 的旧记录会先被删除
    pub async fn add_image(
        &self,
        key: &str,
        source: &ImageSource,
        metadata: Option<Value>,
    ) -> Result<RecordId> {
        let mut flow = Flow::new("add_image");
        flow.enter(Phase::BuildingQuery);
        let result = self.add_image_inner(&mut flow, key, source, metadata).await;
        flow.finish(result)
    }

    async fn add_image_inner(
        &self,
        flow: &mut Flow,
        key: &str,
        source: &ImageSource,
        metadata: Option<Value>,
    ) -> Result<RecordId> {
        if key.is_empty() {
            return Err(Error::input("key 不能为空"));
        }
        if let ImageSource::Key(_) = source {
            return Err(Error::input("不能使用已入库的 key 作为新图片的来源"));
        }

        let signature = self.signature_of(source).await?;

        flow.enter(Phase::AwaitingStore);
        if let Some(expected) = self.store.dimension().await? {
            if expected != signature.len() {
                return Err(Error::DimensionMismatch { expected, found: signature.len() });
            }
        }

        let record = NewRecord {
            key: key.to_owned(),
            signature: signature.vector,
            words: signature.words,
            metadata,
            created_at: self.clock.now(),
        };
        let (removed, id) = self.dedup.insert_unique(&self.store, record).await?;
        metrics::inc_insert();
        info!("添加图片 {} => {}，替换 {} 条旧记录", key, id, removed);

        Ok(id)
    }

    /// 搜索相似图片
    pub async fn search_image(
        &self,
        source: &ImageSource,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>> {
        let mut flow = Flow::new("search_image");
        flow.enter(Phase::BuildingQuery);
        let result = self.search_image_inner(&mut flow, source, options).await;
        flow.finish(result)
    }

    async fn search_image_inner(
        &self,
        flow: &mut Flow,
        source: &ImageSource,
        options: &SearchOptions,
    ) -> Result<Vec<SearchMatch>> {
        let cutoff = options.distance_cutoff;
        if !cutoff.is_finite() || !(0. ..=1.).contains(&cutoff) {
            return Err(Error::input(format!("距离阈值必须在 [0, 1] 之间: {cutoff}")));
        }
        for filter in [&options.query_filter, &options.pre_filter].into_iter().flatten() {
            filter.validate()?;
        }

        let start = Instant::now();
        let signature = match source {
            ImageSource::Key(key) => self.stored_signature(key).await?,
            _ => self.signature_of(source).await?,
        };
        let query = CandidateQuery::build(
            &signature,
            &self.words,
            options.query_filter.as_ref(),
            options.pre_filter.as_ref(),
        )?;

        flow.enter(Phase::AwaitingStore);
        let hits = self.store.search(&query).await?;
        let candidates = hits.len();

        flow.enter(Phase::Ranking);
        let rank_options = RankOptions {
            distance_cutoff: cutoff,
            sort_by_distance: options.sort_by_distance,
        };
        let mut matches = ranker::rank(hits, &signature.vector, rank_options)?;
        if let Some(limit) = options.limit {
            matches.truncate(limit);
        }

        let elapsed = start.elapsed().as_secs_f32();
        debug!("候选 {} 个，命中 {} 个，耗时 {:.3}s", candidates, matches.len(), elapsed);
        metrics::inc_search(source_label(source), elapsed, candidates, matches.len());

        Ok(matches)
    }

    /// 按 key 精确查找记录，找不到时返回空列表
    pub async fn search_by_key(&self, key: &str) -> Result<Vec<StoredRecord>> {
        if key.is_empty() {
            return Err(Error::input("key 不能为空"));
        }
        self.store.find_by_key(key).await
    }

    /// 按 key 获取记录，找不到时返回 `NotFound`
    pub async fn get_record(&self, key: &str) -> Result<StoredRecord> {
        self.search_by_key(key)
            .await?
            .pop()
            .ok_or_else(|| Error::NotFound(key.to_owned()))
    }

    /// 删除该 key 的所有记录，返回删除的数量
    pub async fn delete_duplicates(&self, key: &str) -> Result<usize> {
        if key.is_empty() {
            return Err(Error::input("key 不能为空"));
        }
        self.dedup.delete_duplicates(&self.store, key).await
    }

    /// 按 ID 删除一条记录，记录不存在时返回 false
    pub async fn delete_record(&self, id: &RecordId) -> Result<bool> {
        self.store.delete(id).await
    }

    /// 记录总数
    pub async fn count(&self) -> Result<u64> {
        self.store.count().await
    }

    /// 读取图片并计算签名，计算放在阻塞线程池中进行
    async fn signature_of(&self, source: &ImageSource) -> Result<Signature> {
        let data = match source {
            ImageSource::Bytes(data) => data.clone(),
            ImageSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| Error::input(format!("无法读取 {}: {}", path.display(), e)))?,
            ImageSource::Url(url) => self.fetcher.fetch(url).await?,
            ImageSource::Key(_) => return Err(Error::input("key 没有图片数据")),
        };
        if data.is_empty() {
            return Err(Error::input("图片数据为空"));
        }

        let generator = self.generator.clone();
        let signature = spawn_blocking(move || generator.signature(&data))
            .await
            .map_err(|e| Error::Internal(format!("签名生成器异常退出: {e}")))??;
        self.words.check(&signature)?;
        Ok(signature)
    }

    /// 使用已入库记录的签名，分桶按当前配置重新推导
    async fn stored_signature(&self, key: &str) -> Result<Signature> {
        let record = self
            .store
            .find_by_key(key)
            .await?
            .pop()
            .ok_or_else(|| Error::NotFound(key.to_owned()))?;
        Ok(Signature::from_vector(record.signature, &self.words))
    }
}

fn source_label(source: &ImageSource) -> &'static str {
    match source {
        ImageSource::Bytes(_) => "bytes",
        ImageSource::Path(_) => "path",
        ImageSource::Url(_) => "url",
        ImageSource::Key(_) => "key",
    }
}
