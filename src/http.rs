//! HTTP 辅助工具：路由构建、CORS 与安全头。

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, response::Response};
use std::net::IpAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::files;
use crate::health;
use crate::stats::{self, QuotaConfig};
use crate::storage::Storage;
use crate::upload::{self, UploadConfig};

/// 构建 `/api` 路由，注入存储、上传与配额配置。
///
/// 上传路由关闭默认请求体限制，大小由上传处理器流式校验。
pub fn build_router(
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
    quota: Arc<QuotaConfig>,
) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route(
            "/api/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/files", get(files::list_files))
        .route(
            "/api/files/{filename}",
            get(files::file_info).delete(files::delete_file),
        )
        .route("/api/search/{query}", get(files::search_files))
        .route("/api/stats", get(stats::storage_stats))
        .route("/api/download/{filename}", get(files::download_file))
        .route("/api/view/{filename}", get(files::view_file))
        .layer(middleware::from_fn(add_security_headers))
        .layer(Extension(storage))
        .layer(Extension(upload_config))
        .layer(Extension(quota))
}

/// 构建 CORS Layer（支持逗号分隔的来源列表，`*` 表示任意来源）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let cors_origins = cors_origins?.trim();
    if cors_origins == "*" {
        return Some(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let origins = cors_origins
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}
