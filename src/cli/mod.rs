mod add;
mod dedup;
mod delete;
mod search;
pub mod server;
mod show;

pub use add::*;
pub use dedup::*;
pub use delete::*;
pub use search::*;
pub use server::*;
pub use show::*;

use std::sync::Arc;

use crate::config::Opts;
use crate::source::HttpFetcher;
use crate::store::SqliteStore;
use crate::utils::default_generator;
use crate::ImageSearcher;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 按全局参数打开数据库并创建检索器
pub async fn open_searcher(opts: &Opts) -> anyhow::Result<ImageSearcher<SqliteStore>> {
    let config = opts.store.to_config();
    let store = SqliteStore::open(opts.conf_dir.database(), config).await?;
    let words = opts.words.to_config();
    Ok(ImageSearcher::builder(store)
        .words(words)
        .generator(default_generator(words))
        .fetcher(Arc::new(HttpFetcher::new(config.timeout)))
        .build())
}
