use std::sync::Arc;

use crate::ImageSearcher;
use crate::store::SqliteStore;

/// 应用状态
pub struct AppState {
    /// 图片检索器
    pub searcher: ImageSearcher<SqliteStore>,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(searcher: ImageSearcher<SqliteStore>, token: String) -> Arc<Self> {
        Arc::new(AppState { searcher, token })
    }
}
