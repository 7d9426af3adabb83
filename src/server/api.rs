use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum_auth::AuthBearer;
use axum_typed_multipart::TypedMultipart;
use log::info;

use super::error::{Result, Unauthorized};
use super::state::AppState;
use super::types::*;
use crate::query::Filter;
use crate::record::StoredRecord;
use crate::source::parse_url;
use crate::{Error, ImageSource, SearchOptions, metrics};

fn check_token(state: &AppState, token: &str) -> Result<()> {
    if token != state.token {
        return Err(Unauthorized.into());
    }
    Ok(())
}

fn parse_filter(s: Option<&str>) -> Result<Option<Filter>> {
    match s.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => {
            let filter = serde_json::from_str::<Filter>(s)
                .map_err(|e| Error::input(format!("无效的过滤条件: {e}")))?;
            Ok(Some(filter))
        }
        None => Ok(None),
    }
}

/// 请求中的图片来源，上传文件与 URL 必须且只能提供一个
fn request_source(file: Option<Bytes>, url: Option<String>) -> Result<ImageSource> {
    let url = url.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty());
    match (file, url) {
        (Some(file), None) => Ok(ImageSource::Bytes(file.to_vec())),
        (None, Some(url)) => {
            parse_url(&url)?;
            Ok(ImageSource::Url(url))
        }
        (Some(_), Some(_)) => Err(Error::input("file 和 url 只能提供一个").into()),
        (None, None) => Err(Error::input("缺少 file 或 url").into()),
    }
}

/// 添加图片到数据库，同一个 key 的旧记录会被替换
#[utoipa::path(
    post,
    path = "/add",
    request_body(content = AddImageForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = AddImageResponse),
    ),
    security(("bearer" = []))
)]
pub async fn add_image_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    TypedMultipart(data): TypedMultipart<AddImageRequest>,
) -> Result<Json<AddImageResponse>> {
    check_token(&state, &token)?;

    let metadata = match data.metadata.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Some(
            serde_json::from_str(s).map_err(|e| Error::input(format!("无效的元数据: {e}")))?,
        ),
        None => None,
    };

    let source = request_source(data.file, data.url)?;
    let id = state.searcher.add_image(&data.key, &source, metadata).await?;
    Ok(Json(AddImageResponse { id }))
}

/// 搜索一张图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    TypedMultipart(data): TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let defaults = SearchOptions::default();
    let options = SearchOptions {
        query_filter: parse_filter(data.filter.as_deref())?,
        pre_filter: parse_filter(data.pre_filter.as_deref())?,
        distance_cutoff: data.cutoff.unwrap_or(defaults.distance_cutoff),
        sort_by_distance: data.sort.unwrap_or(defaults.sort_by_distance),
        limit: data.count,
    };

    let source = request_source(data.file, data.url)?;

    let start = Instant::now();
    info!("正在搜索上传图片");

    let result = state.searcher.search_image(&source, &options).await?;

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 使用已入库记录的签名进行搜索
#[utoipa::path(
    post,
    path = "/search/key",
    request_body = SearchKeyRequest,
    responses(
        (status = 200, body = SearchResponse),
    )
)]
pub async fn search_key_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<SearchKeyRequest>,
) -> Result<Json<SearchResponse>> {
    let options = SearchOptions {
        query_filter: data.filter,
        pre_filter: data.pre_filter,
        distance_cutoff: data.cutoff.unwrap_or(SearchOptions::default().distance_cutoff),
        sort_by_distance: data.sort,
        limit: data.count,
    };

    let start = Instant::now();
    info!("正在搜索记录 {}", data.key);

    let result = state.searcher.search_image(&ImageSource::Key(data.key), &options).await?;

    Ok(Json(SearchResponse { time: start.elapsed().as_millis() as u64, result }))
}

/// 获取某个 key 对应的记录
#[utoipa::path(
    get,
    path = "/records/{key}",
    params(("key" = String, Path, description = "记录的 key")),
    responses(
        (status = 200, body = StoredRecord),
        (status = 404, description = "记录不存在"),
    )
)]
pub async fn get_record_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<StoredRecord>> {
    Ok(Json(state.searcher.get_record(&key).await?))
}

/// 删除某个 key 对应的所有记录
#[utoipa::path(
    delete,
    path = "/records/{key}",
    params(("key" = String, Path, description = "记录的 key")),
    responses(
        (status = 200, body = DeleteResponse),
    ),
    security(("bearer" = []))
)]
pub async fn delete_record_handler(
    State(state): State<Arc<AppState>>,
    AuthBearer(token): AuthBearer,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    check_token(&state, &token)?;
    let deleted = state.searcher.delete_duplicates(&key).await?;
    Ok(Json(DeleteResponse { deleted }))
}

/// 导出 prometheus 指标
#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics_handler() -> String {
    metrics::gather_text()
}
