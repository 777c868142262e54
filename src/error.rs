//! 统一的 API 错误类型与 JSON 错误响应。

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::io::ErrorKind;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
    PayloadTooLarge(u64),
    RangeNotSatisfiable(u64),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
            ApiError::PayloadTooLarge(limit) => format!("File too large (max {limit} bytes)"),
            ApiError::RangeNotSatisfiable(_) => "range not satisfiable".into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let ApiError::RangeNotSatisfiable(size) = &self
            && let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}"))
        {
            headers.insert(header::CONTENT_RANGE, value);
        }
        let body = Json(json!({ "success": false, "error": self.message() }));
        (self.status(), headers, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidName => ApiError::BadRequest("Invalid filename".into()),
            StorageError::NotAFile => ApiError::BadRequest("path is not a file".into()),
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound("File not found".into()),
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io;

    #[tokio::test]
    async fn error_envelope_carries_message() {
        let response = ApiError::NotFound("File not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "File not found");
    }

    #[test]
    fn storage_not_found_maps_to_404() {
        let error: ApiError = StorageError::Io(io::Error::from(ErrorKind::NotFound)).into();
        assert!(matches!(error, ApiError::NotFound(_)));
        let error: ApiError =
            StorageError::Io(io::Error::from(ErrorKind::PermissionDenied)).into();
        assert!(matches!(error, ApiError::Internal(_)));
        let error: ApiError = StorageError::InvalidName.into();
        assert!(matches!(error, ApiError::BadRequest(_)));
    }

    #[test]
    fn range_error_sets_content_range() {
        let response = ApiError::RangeNotSatisfiable(42).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */42"
        );
    }
}
