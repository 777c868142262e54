//! 上传临时文件清理的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::UPLOAD_CLEAN_INTERVAL_SECS;
use crate::storage::Storage;
use crate::upload::{UploadConfig, cleanup_stale_uploads};

/// 启动后台任务：定期清理中断上传遗留的临时文件。
///
/// 第一次 tick 立即触发，因此启动时也会清理一次。
pub fn spawn_background_tasks(storage: Arc<Storage>, upload: Arc<UploadConfig>) {
    if upload.temp_ttl.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(UPLOAD_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_stale_uploads(&storage, &upload).await {
                warn!(error = %err, "upload temp cleanup failed");
            }
        }
    });
}
