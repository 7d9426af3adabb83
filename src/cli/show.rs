use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 记录的 key
    pub key: String,
    /// 同时输出签名向量
    #[arg(long)]
    pub signature: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = open_searcher(opts).await?;
        let records = searcher.search_by_key(&self.key).await?;

        if records.is_empty() {
            eprintln!("找不到 key 为 {} 的记录", self.key);
            return Ok(());
        }

        for record in records {
            println!("id        : {}", record.id);
            println!("key       : {}", record.key);
            println!("created_at: {}", record.created_at.to_rfc3339());
            if let Some(metadata) = &record.metadata {
                println!("metadata  : {}", metadata);
            }
            if self.signature {
                println!("signature : {:?}", record.signature);
            }
        }
        Ok(())
    }
}
