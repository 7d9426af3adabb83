use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use log::debug;
use url::Url;

use crate::error::{Error, Result};

/// 图片来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// 图片内容
    Bytes(Vec<u8>),
    /// 本地文件
    Path(PathBuf),
    /// 远程地址，通过 [`SourceFetcher`] 下载
    Url(String),
    /// 已入库记录的 key，只能用于搜索
    Key(String),
}

impl ImageSource {
    /// 根据字符串猜测来源类型：http(s) 开头视为 URL，否则视为本地路径
    pub fn guess(s: &str) -> Self {
        if s.starts_with("http://") || s.starts_with("https://") {
            Self::Url(s.to_owned())
        } else {
            Self::Path(PathBuf::from(s))
        }
    }
}

/// 下载远程图片
pub trait SourceFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// 检查 URL 格式，只允许 http 和 https
pub fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::input(format!("无效的 URL {url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(Error::input(format!("不支持的 URL 协议: {scheme}"))),
    }
}

/// 使用 reqwest 下载图片，连接在多次请求之间复用
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("immatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let url = parse_url(url)?;
        debug!("下载图片: {}", url);

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("下载 {url} 失败: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(Error::input(format!("下载 {url} 失败: {status}")));
        }
        if !status.is_success() {
            return Err(Error::StoreUnavailable(format!("下载 {url} 失败: {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("读取 {url} 失败: {e}")))?;
        Ok(bytes.to_vec())
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(self.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess() {
        assert_eq!(ImageSource::guess("https://a.com/x.jpg"), ImageSource::Url("https://a.com/x.jpg".into()));
        assert_eq!(ImageSource::guess("x.jpg"), ImageSource::Path("x.jpg".into()));
    }

    #[test]
    fn test_parse_url() {
        assert!(parse_url("https://example.com/a.jpg").is_ok());
        assert!(matches!(parse_url("not a url"), Err(Error::Input(_))));
        assert!(matches!(parse_url("ftp://example.com/a.jpg"), Err(Error::Input(_))));
        assert!(matches!(parse_url("file:///etc/passwd"), Err(Error::Input(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_before_request() {
        let fetcher = HttpFetcher::default();
        let result = fetcher.fetch("ftp://127.0.0.1/a.json").await;
        assert!(matches!(result, Err(Error::Input(_))));
    }
}
