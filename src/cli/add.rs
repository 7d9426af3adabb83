use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::info;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::ImageSource;
use crate::cli::{SubCommandExtend, open_searcher};
use crate::config::Opts;
use crate::utils::{DEFAULT_SUFFIX, pb_style};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 图片路径，可以是单个文件、目录或者 http(s) URL
    pub path: PathBuf,
    /// 单个文件或 URL 时使用的 key，默认使用文件路径或 URL
    #[arg(short, long)]
    pub key: Option<String>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 在作为 key 之前使用正则表达式对图片路径进行处理
    /// 例：--replace '/path/to/image/(?<name>[0-9]+).jpg' '$name'
    #[arg(short, long, num_args = 2, value_names = ["REGEX", "REPLACE"], verbatim_doc_comment)]
    pub replace: Vec<String>,
    /// 附加到每条记录上的元数据，JSON 格式
    #[arg(short, long, value_parser = parse_json)]
    pub metadata: Option<Value>,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let replace = match self.replace.as_slice() {
            [] => None,
            [re, rep] => Some((Regex::new(re)?, rep.clone())),
            _ => return Err(anyhow!("--replace 需要两个参数")),
        };
        let to_key = |path: &str| match &replace {
            Some((re, rep)) => re.replace(path, rep.as_str()).into_owned(),
            None => path.to_owned(),
        };

        let searcher = open_searcher(opts).await?;

        if let ImageSource::Url(url) = ImageSource::guess(&self.path.to_string_lossy()) {
            let key = self.key.clone().unwrap_or_else(|| url.clone());
            let id = searcher.add_image(&key, &ImageSource::Url(url), self.metadata.clone()).await?;
            println!("{}\t{}", id, key);
            return Ok(());
        }

        if self.path.is_file() {
            let key = match &self.key {
                Some(key) => key.clone(),
                None => to_key(&self.path.to_string_lossy()),
            };
            let source = ImageSource::Path(self.path.clone());
            let id = searcher.add_image(&key, &source, self.metadata.clone()).await?;
            println!("{}\t{}", id, key);
            return Ok(());
        }

        if self.key.is_some() {
            return Err(anyhow!("添加目录时不能指定 --key"));
        }

        let re_suf = Regex::new(&format!("(?i)^({})$", self.suffix.replace(',', "|")))?;

        info!("开始扫描目录: {}", self.path.display());
        let entries = WalkDir::new(&self.path)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.is_file()
                    && path.extension().is_some_and(|ext| re_suf.is_match(&ext.to_string_lossy()))
            })
            .collect::<Vec<_>>();
        info!("扫描完成，共 {} 张图片", entries.len());

        let pb = ProgressBar::new(entries.len() as u64).with_style(pb_style());
        let failed = AtomicUsize::new(0);

        futures::stream::iter(entries)
            .for_each_concurrent(num_cpus::get(), |path| {
                let (searcher, pb, failed) = (&searcher, &pb, &failed);
                let key = to_key(&path.to_string_lossy());
                async move {
                    let source = ImageSource::Path(path);
                    match searcher.add_image(&key, &source, self.metadata.clone()).await {
                        Ok(_) => pb.set_message(key),
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            pb.println(format!("添加失败 {}: {}", key, e));
                        }
                    }
                    pb.inc(1);
                }
            })
            .await;

        pb.finish_with_message("图片添加完成");

        let failed = failed.into_inner();
        if failed > 0 {
            info!("{} 张图片添加失败", failed);
        }

        Ok(())
    }
}

pub(crate) fn parse_json(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("无效的 JSON: {e}"))
}
