//! 存储统计：总量、可读格式与配额百分比。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::error::ApiError;
use crate::storage::Storage;

const BYTE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// 对外报告的存储配额，上传时不做限制。
#[derive(Debug)]
pub struct QuotaConfig {
    pub storage_limit: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsResponse {
    success: bool,
    total_files: usize,
    total_storage: String,
    storage_used: u64,
    storage_limit: u64,
    usage_percentage: String,
}

/// 返回文件数、已用空间与配额使用百分比。
pub async fn storage_stats(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(quota): Extension<Arc<QuotaConfig>>,
) -> Result<JsonResponse<StatsResponse>, ApiError> {
    let entries = storage.list_files().await.map_err(|err| {
        error!(error = ?err, "read stats failed");
        ApiError::Internal("Error reading stats".into())
    })?;
    let storage_used: u64 = entries.iter().map(|entry| entry.size).sum();

    Ok(JsonResponse(StatsResponse {
        success: true,
        total_files: entries.len(),
        total_storage: format_bytes(storage_used),
        storage_used,
        storage_limit: quota.storage_limit,
        usage_percentage: usage_percentage(storage_used, quota.storage_limit),
    }))
}

/// 以 1024 为底格式化字节数，保留两位小数并去掉多余的零。
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} Bytes");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < BYTE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", BYTE_UNITS[unit])
}

pub fn usage_percentage(used: u64, limit: u64) -> String {
    if limit == 0 {
        return "0.00".to_string();
    }
    format!("{:.2}", used as f64 / limit as f64 * 100.0)
}
