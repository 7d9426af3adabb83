use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::query::Filter;
use crate::record::{RecordId, SearchMatch};

/// 添加图片请求参数
#[derive(TryFromMultipart)]
pub struct AddImageRequest {
    pub key: String,
    pub file: Option<Bytes>,
    pub url: Option<String>,
    pub metadata: Option<String>,
}

/// 添加图片表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct AddImageForm {
    /// 图片的 key，同一个 key 只保留最新的一条记录
    pub key: String,
    /// 上传的图片文件，与 url 二选一
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: Option<String>,
    /// 图片的 http(s) 地址，与 file 二选一
    pub url: Option<String>,
    /// 附加的元数据，JSON 格式
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddImageResponse {
    /// 新记录的 ID
    pub id: RecordId,
}

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub file: Option<Bytes>,
    pub url: Option<String>,
    pub cutoff: Option<f32>,
    pub filter: Option<String>,
    pub pre_filter: Option<String>,
    pub sort: Option<bool>,
    pub count: Option<usize>,
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件，与 url 二选一
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub file: Option<String>,
    /// 图片的 http(s) 地址，与 file 二选一
    pub url: Option<String>,
    /// 距离阈值，默认 0.45
    pub cutoff: Option<f32>,
    /// 与分桶条件同时满足的过滤条件，JSON 格式
    pub filter: Option<String>,
    /// 预过滤条件，JSON 格式
    pub pre_filter: Option<String>,
    /// 是否按距离排序
    pub sort: Option<bool>,
    /// 最多返回的结果数量
    pub count: Option<usize>,
}

/// 使用已入库记录搜索
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchKeyRequest {
    /// 已入库记录的 key
    pub key: String,
    /// 距离阈值，默认 0.45
    pub cutoff: Option<f32>,
    #[schema(value_type = Option<Object>)]
    pub filter: Option<Filter>,
    #[schema(value_type = Option<Object>)]
    pub pre_filter: Option<Filter>,
    #[serde(default)]
    pub sort: bool,
    pub count: Option<usize>,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 距离小于阈值的结果
    pub result: Vec<SearchMatch>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    /// 删除的记录数量
    pub deleted: usize,
}
