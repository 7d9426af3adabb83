use std::convert::Infallible;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;

use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::Opts;
use crate::query::Filter;
use crate::ranker::DEFAULT_DISTANCE_CUTOFF;
use crate::record::SearchMatch;
use crate::{ImageSource, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 被搜索的图片路径或 URL
    pub image: String,
    /// 把 IMAGE 视为已入库记录的 key，使用其签名进行搜索
    #[arg(long)]
    pub by_key: bool,
    /// 两个签名之间允许的最大距离，范围从 0 到 1
    #[arg(long, value_name = "DISTANCE", default_value_t = DEFAULT_DISTANCE_CUTOFF)]
    pub cutoff: f32,
    /// 按距离从小到大排序，默认按粗筛分数排序
    #[arg(long)]
    pub sort: bool,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT")]
    pub count: Option<usize>,
    /// 与分桶条件同时满足的过滤条件，JSON 格式
    #[arg(long, value_name = "JSON", value_parser = parse_filter)]
    pub filter: Option<Filter>,
    /// 预过滤条件，不参与计分，JSON 格式
    #[arg(long, value_name = "JSON", value_parser = parse_filter)]
    pub pre_filter: Option<Filter>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let searcher = open_searcher(opts).await?;

        let source = match self.by_key {
            true => ImageSource::Key(self.image.clone()),
            false => ImageSource::guess(&self.image),
        };
        let options = SearchOptions {
            query_filter: self.filter.clone(),
            pre_filter: self.pre_filter.clone(),
            distance_cutoff: self.cutoff,
            sort_by_distance: self.sort,
            limit: self.count,
        };

        let result = searcher.search_image(&source, &options).await?;
        debug!("共 {} 条结果", result.len());

        print_result(&result, self)
    }
}

fn print_result(result: &[SearchMatch], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for m in result {
                println!("{:.4}\t{:.2}\t{}\t{}", m.distance, m.score, m.id, m.key);
            }
        }
    }
    Ok(())
}

pub(crate) fn parse_filter(s: &str) -> Result<Filter, String> {
    let filter: Filter = serde_json::from_str(s).map_err(|e| format!("无效的过滤条件: {e}"))?;
    filter.validate().map_err(|e| e.to_string())?;
    Ok(filter)
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            _ => Ok(Self::Table),
        }
    }
}
