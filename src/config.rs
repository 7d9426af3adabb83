use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::signature::WordsConfig;
use crate::store::StoreConfig;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "immatch", "immatch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".immatch"));
    ConfDir { path }
});

#[derive(Parser, Debug, Clone)]
pub struct StoreOptions {
    /// 粗筛阶段最多返回的候选数量
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub size: usize,
    /// 单次数据库请求的超时时间，单位为秒
    #[arg(long, value_name = "SECS", default_value = "10", value_parser = parse_timeout)]
    pub timeout: Duration,
}

impl StoreOptions {
    pub fn to_config(&self) -> StoreConfig {
        StoreConfig { size: self.size, timeout: self.timeout }
    }
}

/// 解析以秒为单位的超时时间，拒绝负数、NaN 和无穷大
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("无效的超时时间 {s}: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("无效的超时时间 {s}: {e}"))
}

#[derive(Parser, Debug, Clone)]
pub struct WordOptions {
    /// 每个签名的分桶数量
    #[arg(long, value_name = "N", default_value_t = 63)]
    pub words: usize,
    /// 每个分桶覆盖的签名分量数量
    #[arg(long, value_name = "K", default_value_t = 16)]
    pub word_length: usize,
}

impl WordOptions {
    pub fn to_config(&self) -> WordsConfig {
        WordsConfig::new(self.words, self.word_length)
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "immatch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// immatch 配置文件目录
    #[arg(short, long, default_value_t = CONF_DIR.clone())]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub store: StoreOptions,
    #[command(flatten)]
    pub words: WordOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加图片到数据库，同一个 key 只保留最新的记录
    Add(AddCommand),
    /// 从数据库中搜索相似图片
    Search(SearchCommand),
    /// 显示某个 key 对应的记录
    Show(ShowCommand),
    /// 删除某个 key 对应的所有记录
    Dedup(DedupCommand),
    /// 按 ID 删除记录
    Delete(DeleteCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("immatch.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl std::fmt::Display for ConfDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_timeout("0.5").unwrap(), Duration::from_millis(500));
        for s in ["inf", "-1", "NaN", "abc", "1e300"] {
            assert!(parse_timeout(s).is_err(), "{s}");
        }
    }

    #[test]
    fn test_opts_reject_infinite_timeout() {
        let opts = Opts::try_parse_from(["immatch", "-c", "/tmp/x", "show", "a"]).unwrap();
        assert_eq!(opts.store.to_config().timeout, Duration::from_secs(10));

        let result = Opts::try_parse_from(["immatch", "--timeout", "inf", "show", "a"]);
        assert!(result.is_err());
    }
}
