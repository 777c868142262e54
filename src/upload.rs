//! multipart 上传处理器与过期临时文件清理。

use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::response::Json as JsonResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::atomic::TempUpload;
use crate::config::{UPLOAD_TEMP_PREFIX, UPLOAD_TEMP_SUFFIX};
use crate::error::ApiError;
use crate::storage::{Storage, sanitize_original_name};

const UPLOAD_FIELD: &str = "file";

#[derive(Debug)]
pub struct UploadConfig {
    pub max_size: u64,
    pub temp_ttl: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadedFile {
    original_name: String,
    stored_name: String,
    size: u64,
    upload_date: DateTime<Utc>,
    mime_type: String,
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    success: bool,
    message: &'static str,
    file: UploadedFile,
}

/// 接收 multipart 中的 `file` 字段，流式写入临时文件后发布为存储名。
pub async fn upload_file(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let mut multipart = multipart.map_err(|err| {
        debug!(error = %err, "upload request is not multipart");
        no_file_uploaded()
    })?;

    while let Some(mut field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "failed to read multipart field");
        ApiError::BadRequest("Invalid multipart data".into())
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let declared_mime = field
            .content_type()
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let original = sanitize_original_name(&raw_name);

        let mut temp = TempUpload::new(storage.root_path()).await.map_err(|err| {
            error!(error = %err, "failed to create upload temp file");
            ApiError::Internal("Failed to save file".into())
        })?;
        let size = match stream_field(&mut field, &mut temp, upload.max_size).await {
            Ok(size) => size,
            Err(err) => {
                temp.cleanup().await;
                return Err(err);
            }
        };
        let stored_name = temp.publish(&original).await.map_err(|err| {
            error!(name = original, error = %err, "failed to publish upload");
            ApiError::Internal("Failed to save file".into())
        })?;

        let mime_type = declared_mime.unwrap_or_else(|| {
            mime_guess::from_path(&original)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        info!(stored_name, size, mime_type, "upload complete");

        return Ok(JsonResponse(UploadResponse {
            success: true,
            message: "File uploaded successfully!",
            file: UploadedFile {
                original_name: raw_name,
                stored_name,
                size,
                upload_date: Utc::now(),
                mime_type,
            },
        }));
    }

    Err(no_file_uploaded())
}

async fn stream_field(
    field: &mut Field<'_>,
    temp: &mut TempUpload,
    max_size: u64,
) -> Result<u64, ApiError> {
    let mut total_written: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(|err| {
        warn!(error = %err, "upload stream interrupted");
        ApiError::BadRequest("Failed to read file".into())
    })? {
        total_written += chunk.len() as u64;
        if max_size > 0 && total_written > max_size {
            warn!(max_size, "upload rejected, size exceeds limit");
            return Err(ApiError::PayloadTooLarge(max_size));
        }
        temp.file_mut()
            .write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }
    temp.file_mut()
        .flush()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(total_written)
}

fn no_file_uploaded() -> ApiError {
    ApiError::BadRequest("No file uploaded".into())
}

fn is_upload_temp_name(name: &str) -> bool {
    name.starts_with(UPLOAD_TEMP_PREFIX) && name.ends_with(UPLOAD_TEMP_SUFFIX)
}

/// 清理被中断上传遗留的过期临时文件。
pub async fn cleanup_stale_uploads(
    storage: &Storage,
    upload: &UploadConfig,
) -> Result<(), std::io::Error> {
    if upload.temp_ttl.is_zero() {
        return Ok(());
    }

    let now = SystemTime::now();
    let mut dir = fs::read_dir(storage.root_path()).await?;
    while let Some(entry) = dir.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_upload_temp_name(&name) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(value) => value,
            Err(_) => continue,
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = match metadata.modified() {
            Ok(value) => value,
            Err(_) => continue,
        };
        let age = match now.duration_since(modified) {
            Ok(value) => value,
            Err(_) => continue,
        };
        if age >= upload.temp_ttl {
            let path = entry.path();
            if let Err(err) = fs::remove_file(&path).await {
                warn!(path = ?path, error = %err, "failed to remove stale upload temp file");
            } else {
                info!(path = ?path, "removed stale upload temp file");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use tempfile::tempdir;

    const BOUNDARY: &str = "axo-test-boundary";

    fn make_storage() -> (tempfile::TempDir, Arc<Storage>) {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("storage");
        std::fs::create_dir_all(&root).expect("create storage root");
        (temp, Arc::new(Storage::new(root)))
    }

    fn make_upload_config(max_size: u64) -> Arc<UploadConfig> {
        Arc::new(UploadConfig {
            max_size,
            temp_ttl: Duration::from_secs(60),
        })
    }

    fn file_part(field: &str, filename: &str, content: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        )
    }

    fn text_part(field: &str, value: &str) -> String {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
        )
    }

    async fn multipart(parts: &[String]) -> Result<Multipart, MultipartRejection> {
        let body = format!("{}--{BOUNDARY}--\r\n", parts.concat());
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request");
        Multipart::from_request(request, &()).await
    }

    fn stored_entries(storage: &Storage) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(storage.root_path())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn upload_writes_file_under_stored_name() {
        let (_temp, storage) = make_storage();
        let JsonResponse(response) = upload_file(
            Extension(storage.clone()),
            Extension(make_upload_config(0)),
            multipart(&[text_part("note", "ignored"), file_part("file", "hello.txt", "hello world")]).await,
        )
        .await
        .unwrap_or_else(|_| panic!("upload failed"));

        assert!(response.success);
        assert_eq!(response.file.original_name, "hello.txt");
        assert_eq!(response.file.size, 11);
        assert_eq!(response.file.mime_type, "text/plain");
        assert!(response.file.stored_name.ends_with("-hello.txt"));

        let contents = fs::read(storage.root_path().join(&response.file.stored_name))
            .await
            .expect("read stored file");
        assert_eq!(contents, b"hello world");
        assert_eq!(stored_entries(&storage), [response.file.stored_name]);
    }

    #[tokio::test]
    async fn upload_sanitizes_traversal_filename() {
        let (temp, storage) = make_storage();
        let JsonResponse(response) = upload_file(
            Extension(storage.clone()),
            Extension(make_upload_config(0)),
            multipart(&[file_part("file", "../../escape.txt", "x")]).await,
        )
        .await
        .unwrap_or_else(|_| panic!("upload failed"));

        assert!(response.file.stored_name.ends_with("-escape.txt"));
        assert!(!response.file.stored_name.contains('/'));
        assert!(!temp.path().join("escape.txt").exists());
        assert_eq!(stored_entries(&storage).len(), 1);
    }

    #[tokio::test]
    async fn upload_over_limit_is_rejected_without_leftovers() {
        let (_temp, storage) = make_storage();
        let result = upload_file(
            Extension(storage.clone()),
            Extension(make_upload_config(4)),
            multipart(&[file_part("file", "big.bin", "0123456789")]).await,
        )
        .await;

        assert!(matches!(result, Err(ApiError::PayloadTooLarge(4))));
        assert!(stored_entries(&storage).is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_field_is_bad_request() {
        let (_temp, storage) = make_storage();
        let result = upload_file(
            Extension(storage.clone()),
            Extension(make_upload_config(0)),
            multipart(&[text_part("file", "not a file")]).await,
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(msg)) if msg == "No file uploaded"));

        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .body(AxumBody::empty())
            .expect("request");
        let result = upload_file(
            Extension(storage.clone()),
            Extension(make_upload_config(0)),
            Multipart::from_request(request, &()).await,
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(stored_entries(&storage).is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_stale_temp_files() {
        let (_temp, storage) = make_storage();
        let root = storage.root_path();
        std::fs::write(root.join(".upload-stale.tmp"), b"partial").expect("write temp");
        std::fs::write(root.join("1700000000000-keep.txt"), b"keep").expect("write file");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fresh = UploadConfig {
            max_size: 0,
            temp_ttl: Duration::from_secs(3600),
        };
        cleanup_stale_uploads(&storage, &fresh).await.expect("cleanup");
        assert_eq!(stored_entries(&storage).len(), 2);

        let stale = UploadConfig {
            max_size: 0,
            temp_ttl: Duration::from_millis(1),
        };
        cleanup_stale_uploads(&storage, &stale).await.expect("cleanup");
        assert_eq!(stored_entries(&storage), ["1700000000000-keep.txt"]);
    }
}
