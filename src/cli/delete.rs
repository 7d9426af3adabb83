use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use crate::RecordId;
use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct DeleteCommand {
    /// 记录 ID
    pub id: String,
}

impl SubCommandExtend for DeleteCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = open_searcher(opts).await?;
        match searcher.delete_record(&RecordId(self.id.clone())).await? {
            true => info!("已删除记录 {}", self.id),
            false => warn!("记录不存在: {}", self.id),
        }
        Ok(())
    }
}
