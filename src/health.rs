//! 健康检查与版本信息处理器。

use axum::response::Json as JsonResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    status: &'static str,
    timestamp: DateTime<Utc>,
    version: &'static str,
    build_time: &'static str,
    commit: &'static str,
}

/// 返回服务存活状态与构建信息。
pub async fn health() -> JsonResponse<HealthInfo> {
    JsonResponse(HealthInfo {
        status: "Server running",
        timestamp: Utc::now(),
        version: crate::build::PKG_VERSION,
        build_time: crate::build::BUILD_TIME,
        commit: crate::build::SHORT_COMMIT,
    })
}
