use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::Error;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 鉴权失败
#[derive(Debug, thiserror::Error)]
#[error("鉴权失败")]
pub struct Unauthorized;

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<Unauthorized>().is_some() {
            return StatusCode::UNAUTHORIZED;
        }
        match self.0.downcast_ref::<Error>() {
            Some(Error::Input(_) | Error::InvalidSignature(_)) => StatusCode::BAD_REQUEST,
            Some(Error::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(Error::DimensionMismatch { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(Error::StoreUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Some(Error::Internal(_)) | None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
