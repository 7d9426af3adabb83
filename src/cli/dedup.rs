use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DedupCommand {
    /// 需要清理的 key
    pub key: String,
}

impl SubCommandExtend for DedupCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = open_searcher(opts).await?;
        let removed = searcher.delete_duplicates(&self.key).await?;
        info!("已删除 {} 条记录", removed);
        println!("{}", removed);
        Ok(())
    }
}
