//! ETag 计算与条件请求校验。

use axum::http::{HeaderMap, header};
use std::fs::Metadata;
use std::time::UNIX_EPOCH;

/// 根据文件元数据生成弱 ETag。
pub fn etag_from_metadata(metadata: &Metadata) -> String {
    let size = metadata.len();
    let modified = metadata.modified().ok();
    if let Some(modified) = modified
        && let Ok(duration) = modified.duration_since(UNIX_EPOCH)
    {
        return format!(
            "W/\"{}-{}-{}\"",
            size,
            duration.as_secs(),
            duration.subsec_nanos()
        );
    }
    format!("W/\"{}\"", size)
}

/// 判断 If-None-Match 是否命中当前 ETag（命中时可返回 304）。
pub fn is_not_modified(headers: &HeaderMap, current_etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    value.trim() == "*" || etag_matches(value, current_etag)
}

fn etag_matches(header_value: &str, current: &str) -> bool {
    let current = strip_weak(current);
    header_value
        .split(',')
        .map(|item| strip_weak(item.trim()))
        .any(|item| item == current)
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn if_none_match_uses_weak_comparison() {
        let mut headers = HeaderMap::new();
        assert!(!is_not_modified(&headers, "W/\"3-1-0\""));

        headers.insert(
            header::IF_NONE_MATCH,
            HeaderValue::from_static("\"other\", \"3-1-0\""),
        );
        assert!(is_not_modified(&headers, "W/\"3-1-0\""));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("W/\"4-1-0\""));
        assert!(!is_not_modified(&headers, "W/\"3-1-0\""));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(is_not_modified(&headers, "W/\"3-1-0\""));
    }
}
