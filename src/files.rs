//! 文件列表、元数据、搜索、删除、下载与预览处理器。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use chrono::{DateTime, Utc};
use httpdate::{fmt_http_date, parse_http_date};
use serde::Serialize;
use std::fs::Metadata;
use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

use crate::config::VIEW_CACHE_MAX_AGE_SECS;
use crate::error::ApiError;
use crate::etag::{etag_from_metadata, is_not_modified};
use crate::stats::QuotaConfig;
use crate::storage::{Storage, StorageError, original_name};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileDetail {
    name: String,
    size: u64,
    upload_date: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileListResponse {
    success: bool,
    files: Vec<String>,
    file_details: Vec<FileDetail>,
    total_files: usize,
    total_storage_used: u64,
    storage_limit: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileInfoResponse {
    success: bool,
    filename: String,
    size: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteResponse {
    success: bool,
    message: &'static str,
    deleted_file: String,
}

#[derive(Serialize)]
pub(crate) struct SearchResponse {
    success: bool,
    query: String,
    results: Vec<String>,
    count: usize,
}

/// 列出全部文件及其大小、上传时间与总占用。
pub async fn list_files(
    Extension(storage): Extension<Arc<Storage>>,
    Extension(quota): Extension<Arc<QuotaConfig>>,
) -> Result<JsonResponse<FileListResponse>, ApiError> {
    let entries = storage.list_files().await.map_err(|err| {
        error!(error = ?err, "list files failed");
        ApiError::Internal("Cannot read files".into())
    })?;
    let total_storage_used: u64 = entries.iter().map(|entry| entry.size).sum();
    let files: Vec<String> = entries.iter().map(|entry| entry.name.clone()).collect();
    let file_details: Vec<FileDetail> = entries
        .into_iter()
        .map(|entry| FileDetail {
            name: entry.name,
            size: entry.size,
            upload_date: entry.created,
        })
        .collect();
    info!(count = file_details.len(), total_storage_used, "list files");

    Ok(JsonResponse(FileListResponse {
        success: true,
        files,
        total_files: file_details.len(),
        file_details,
        total_storage_used,
        storage_limit: quota.storage_limit,
    }))
}

/// 查询单个文件的元数据。
pub async fn file_info(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<FileInfoResponse>, ApiError> {
    let info = storage.file_info(&filename).await?;
    Ok(JsonResponse(FileInfoResponse {
        success: true,
        filename: info.name,
        size: info.size,
        created_at: info.created,
        updated_at: info.modified,
    }))
}

/// 删除文件：不存在返回 404，其余失败返回 500。
pub async fn delete_file(
    Path(filename): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<DeleteResponse>, ApiError> {
    storage.delete_file(&filename).await.map_err(|err| match err {
        StorageError::Io(err) if err.kind() != ErrorKind::NotFound => {
            error!(filename, error = %err, "delete file failed");
            ApiError::Internal("Cannot delete file".into())
        }
        other => other.into(),
    })?;
    info!(filename, "delete file");
    Ok(JsonResponse(DeleteResponse {
        success: true,
        message: "File deleted successfully",
        deleted_file: filename,
    }))
}

/// 按存储名做不区分大小写的子串搜索（包含时间戳前缀）。
pub async fn search_files(
    Path(query): Path<String>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<JsonResponse<SearchResponse>, ApiError> {
    let entries = storage.list_files().await.map_err(|err| {
        error!(error = ?err, "search files failed");
        ApiError::Internal("Error searching files".into())
    })?;
    let query = query.to_lowercase();
    let results: Vec<String> = entries
        .into_iter()
        .map(|entry| entry.name)
        .filter(|name| name.to_lowercase().contains(&query))
        .collect();
    debug!(query, count = results.len(), "search files");

    Ok(JsonResponse(SearchResponse {
        success: true,
        query,
        count: results.len(),
        results,
    }))
}

/// 下载文件（附件形式），支持 Range 请求与缓存相关头。
pub async fn download_file(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let (target, metadata) = open_stored(&storage, &filename).await?;
    let file_size = metadata.len();
    let modified = metadata.modified().ok();
    let mime = mime_guess::from_path(&filename).first_or_octet_stream();

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, header_value(mime.essence_str())?);
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition("attachment", original_name(&filename)))?,
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    insert_validators(&mut response_headers, &metadata)?;

    let if_range_matches = match request_headers
        .get(header::IF_RANGE)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => match parse_http_date(value) {
            Ok(date) => modified.map(|ts| ts <= date).unwrap_or(false),
            Err(_) => false,
        },
        None => true,
    };

    let range = if if_range_matches {
        parse_range(request_headers.get(header::RANGE), file_size)?
    } else {
        None
    };

    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    if let Some((start, end)) = range {
        let length = end - start + 1;
        debug!(filename, start, end, length, "download range request accepted");
        let mut file = file;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let stream = ReaderStream::new(file.take(length));
        response_headers.insert(
            header::CONTENT_RANGE,
            header_value(&format!("bytes {}-{}/{}", start, end, file_size))?,
        );
        response_headers.insert(header::CONTENT_LENGTH, header_value(&length.to_string())?);
        return Ok((
            StatusCode::PARTIAL_CONTENT,
            response_headers,
            AxumBody::from_stream(stream),
        )
            .into_response());
    }

    response_headers.insert(header::CONTENT_LENGTH, header_value(&file_size.to_string())?);
    info!(filename, size = file_size, "download full file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 内联预览文件，Content-Type 取自固定扩展名表，缓存一小时。
pub async fn view_file(
    Path(filename): Path<String>,
    request_headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let (target, metadata) = open_stored(&storage, &filename).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CACHE_CONTROL,
        header_value(&format!("public, max-age={VIEW_CACHE_MAX_AGE_SECS}"))?,
    );
    insert_validators(&mut response_headers, &metadata)?;
    if is_not_modified(&request_headers, &etag_from_metadata(&metadata)) {
        return Ok((StatusCode::NOT_MODIFIED, response_headers).into_response());
    }

    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(view_content_type(&filename)),
    );
    response_headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition("inline", original_name(&filename)))?,
    );
    response_headers.insert(
        header::CONTENT_LENGTH,
        header_value(&metadata.len().to_string())?,
    );
    let file = File::open(&target)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    debug!(filename, size = metadata.len(), "view file");
    Ok((
        StatusCode::OK,
        response_headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// 预览使用的固定 MIME 表。
pub fn view_content_type(filename: &str) -> &'static str {
    let extension = std::path::Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

async fn open_stored(storage: &Storage, filename: &str) -> Result<(PathBuf, Metadata), ApiError> {
    let target = storage.resolve_name(filename).await?;
    let metadata = fs::metadata(&target).await.map_err(StorageError::from)?;
    if !metadata.is_file() {
        return Err(ApiError::BadRequest("path is not a file".into()));
    }
    Ok((target, metadata))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value).map_err(|_| ApiError::Internal("failed to build header".into()))
}

fn insert_validators(headers: &mut HeaderMap, metadata: &Metadata) -> Result<(), ApiError> {
    headers.insert(header::ETAG, header_value(&etag_from_metadata(metadata))?);
    if let Ok(modified) = metadata.modified() {
        headers.insert(header::LAST_MODIFIED, header_value(&fmt_http_date(modified))?);
    }
    Ok(())
}

/// 生成 Content-Disposition，去除控制字符并为非 ASCII 名称附加 RFC 5987 编码。
fn content_disposition(disposition: &str, filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            c if !c.is_ascii() => '_',
            c => c,
        })
        .collect();
    if fallback == filename {
        return format!("{disposition}; filename=\"{filename}\"");
    }
    format!(
        "{disposition}; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// 解析 Range 头，返回可读取的范围。
fn parse_range(
    value: Option<&HeaderValue>,
    file_size: u64,
) -> Result<Option<(u64, u64)>, ApiError> {
    let Some(value) = value else {
        return Ok(None);
    };
    if file_size == 0 {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
    let Some(range) = value.strip_prefix("bytes=") else {
        return Err(ApiError::BadRequest("invalid Range header".into()));
    };
    if range.contains(',') {
        return Err(ApiError::BadRequest("multiple ranges not supported".into()));
    }

    let mut parts = range.splitn(2, '-');
    let start_part = parts.next().unwrap_or_default();
    let end_part = parts.next().unwrap_or_default();

    let (start, end) = if start_part.is_empty() {
        let suffix: u64 = end_part
            .parse()
            .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
        if suffix == 0 {
            return Ok(None);
        }
        (file_size.saturating_sub(suffix), file_size - 1)
    } else {
        let start: u64 = start_part
            .parse()
            .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?;
        let end: u64 = if end_part.is_empty() {
            file_size - 1
        } else {
            end_part
                .parse::<u64>()
                .map_err(|_| ApiError::BadRequest("invalid Range header".into()))?
                .min(file_size - 1)
        };
        (start, end)
    };

    if start > end || start >= file_size {
        return Err(ApiError::RangeNotSatisfiable(file_size));
    }

    Ok(Some((start, end)))
}
