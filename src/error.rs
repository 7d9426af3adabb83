use thiserror::Error;

/// 检索与入库过程中可能出现的错误
#[derive(Debug, Error)]
pub enum Error {
    /// 输入不合法，在访问存储之前就会被拒绝
    #[error("输入无效: {0}")]
    Input(String),
    /// 签名缺少必需的分桶字段
    #[error("签名无效: {0}")]
    InvalidSignature(String),
    /// 存储连接失败或超时
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),
    /// 查询签名与记录签名维度不一致，通常意味着索引由另一版本的签名构建
    #[error("签名维度不一致: 期望 {expected}，实际 {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// 按 key 查找不到记录
    #[error("找不到记录: {0}")]
    NotFound(String),
    /// 签名生成器崩溃等与输入无关的内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::StoreUnavailable("请求超时".to_string())
    }
}
