//! File delivery with conditional and range support
//!
//! Blobs are immutable, so responses are aggressively cacheable: a strong
//! ETag derived from (id, size, created-at), Last-Modified, and
//! `Cache-Control: private, immutable`. Single byte ranges are honored;
//! multi-range requests fall back to the first range.
//!
//! Access is decided by the ownership fabric before any metadata is
//! disclosed.

use std::time::SystemTime;

use actix_web::http::header::{self, HttpDate};
use actix_web::{web, HttpRequest, HttpResponse};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::{info, warn};

use crate::db::DbPool;
use crate::error::ApiError;
use crate::middleware::AuthContext;
use crate::models::file::{file_data, FileMeta};
use crate::services::access;
use crate::utils::sanitize_filename;

/// GET handler for both `/requests/files/{id}` and
/// `/manager/requests/files/{id}`; the role split is enforced by the
/// scope guards, ownership by the access check here.
pub async fn download_file(
    ctx: AuthContext,
    pool: web::Data<DbPool>,
    path: web::Path<i32>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let file_id = path.into_inner();
    if file_id <= 0 {
        return Err(ApiError::BadRequest("Invalid file ID format".to_string()));
    }

    let user_id = ctx.user_id;
    let role = ctx.role;
    let mut conn = pool.get()?;
    let allowed = web::block(move || access::can_read_file(&mut conn, user_id, role, file_id))
        .await?
        .map_err(|err| {
            warn!(user_id, file_id, error = %err, "File access check failed");
            ApiError::Internal("Failed to check file access rights".to_string())
        })?;
    if !allowed {
        return Err(ApiError::Forbidden(
            "You do not have permission to download this file".to_string(),
        ));
    }

    let mut conn = pool.get()?;
    let meta = web::block(move || FileMeta::find(&mut conn, file_id))
        .await?
        .map_err(|err| match err {
            diesel::result::Error::NotFound => ApiError::NotFound("File not found".to_string()),
            other => ApiError::internal(other),
        })?;

    let mut conn = pool.get()?;
    let data = web::block(move || file_data(&mut conn, file_id))
        .await?
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ApiError::NotFound("File data not found".to_string())
            }
            other => ApiError::internal(other),
        })?;

    let etag = format!(
        "\"file-{}-{}-{}\"",
        meta.id,
        meta.file_size,
        meta.created_at.timestamp()
    );
    let last_modified = HttpDate::from(SystemTime::from(meta.created_at));
    let clean_name = sanitize_filename(&meta.file_name);
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(&clean_name, NON_ALPHANUMERIC)
    );

    // Conditional requests: either validator suffices for a 304.
    let if_none_match = req
        .headers()
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let not_modified = if !if_none_match.is_empty() {
        if_none_match.contains(&etag)
    } else if let Some(since) = req
        .headers()
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<HttpDate>().ok())
    {
        SystemTime::from(meta.created_at) <= SystemTime::from(since)
    } else {
        false
    };

    if not_modified {
        return Ok(HttpResponse::NotModified()
            .insert_header((header::ETAG, etag))
            .insert_header((header::CACHE_CONTROL, "private, max-age=31536000, immutable"))
            .finish());
    }

    let total = data.len() as u64;
    let range_header = req
        .headers()
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    let mut response = match range_header {
        None => HttpResponse::Ok(),
        Some(raw) => match parse_range(raw, total) {
            Some((start, end)) => {
                let mut builder = HttpResponse::PartialContent();
                builder.insert_header((
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{total}"),
                ));
                let body = data[start as usize..=end as usize].to_vec();
                info!(file_id, start, end, total, "Serving partial file content");
                return Ok(builder
                    .insert_header((header::ETAG, etag))
                    .insert_header((
                        header::CACHE_CONTROL,
                        "private, max-age=31536000, immutable",
                    ))
                    .insert_header((header::ACCEPT_RANGES, "bytes"))
                    .insert_header((header::LAST_MODIFIED, last_modified.to_string()))
                    .insert_header((header::CONTENT_TYPE, meta.mime_type.clone()))
                    .insert_header((header::CONTENT_DISPOSITION, disposition.clone()))
                    .body(body));
            }
            None => return Err(ApiError::RangeNotSatisfiable),
        },
    };

    Ok(response
        .insert_header((header::ETAG, etag))
        .insert_header((header::CACHE_CONTROL, "private, max-age=31536000, immutable"))
        .insert_header((header::ACCEPT_RANGES, "bytes"))
        .insert_header((header::LAST_MODIFIED, last_modified.to_string()))
        .insert_header((header::CONTENT_TYPE, meta.mime_type))
        .insert_header((header::CONTENT_DISPOSITION, disposition))
        .body(data))
}

/// Parse a `Range` header against a body of `total` bytes. Returns the
/// inclusive byte range to serve, or `None` when the header is present
/// but unsatisfiable. Only the first range of a multi-range request is
/// honored.
fn parse_range(header_value: &str, total: u64) -> Option<(u64, u64)> {
    let ranges = header_value.strip_prefix("bytes=")?;
    if total == 0 {
        return None;
    }

    let first = ranges.split(',').next()?.trim();
    let (start_raw, end_raw) = first.split_once('-')?;

    if start_raw.is_empty() {
        // Suffix form: the last N bytes, capped at the full body.
        let n: u64 = end_raw.parse().ok().filter(|&n| n > 0)?;
        let n = n.min(total);
        return Some((total - n, total - 1));
    }

    let start: u64 = start_raw.parse().ok()?;
    if start >= total {
        return None;
    }
    let end = if end_raw.is_empty() {
        total - 1
    } else {
        let end: u64 = end_raw.parse().ok()?;
        if end < start || end >= total {
            return None;
        }
        end
    };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_range() {
        assert_eq!(parse_range("bytes=0-0", 5000), Some((0, 0)));
    }

    #[test]
    fn normal_range() {
        assert_eq!(parse_range("bytes=0-1023", 5000), Some((0, 1023)));
        assert_eq!(parse_range("bytes=100-4999", 5000), Some((100, 4999)));
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        assert_eq!(parse_range("bytes=4000-", 5000), Some((4000, 4999)));
    }

    #[test]
    fn suffix_range_takes_last_n_bytes() {
        assert_eq!(parse_range("bytes=-100", 5000), Some((4900, 4999)));
    }

    #[test]
    fn oversized_suffix_covers_whole_body() {
        assert_eq!(parse_range("bytes=-9000", 5000), Some((0, 4999)));
    }

    #[test]
    fn out_of_bounds_ranges_are_unsatisfiable() {
        assert_eq!(parse_range("bytes=5000-5100", 5000), None);
        assert_eq!(parse_range("bytes=0-5000", 5000), None);
        assert_eq!(parse_range("bytes=10-5", 5000), None);
        assert_eq!(parse_range("bytes=-0", 5000), None);
    }

    #[test]
    fn malformed_headers_are_unsatisfiable() {
        assert_eq!(parse_range("bits=0-1", 5000), None);
        assert_eq!(parse_range("bytes=abc-def", 5000), None);
        assert_eq!(parse_range("bytes=", 5000), None);
    }

    #[test]
    fn multi_range_honors_first_range_only() {
        assert_eq!(parse_range("bytes=0-1, 100-200", 5000), Some((0, 1)));
    }

    #[test]
    fn empty_body_never_satisfies_a_range() {
        assert_eq!(parse_range("bytes=0-0", 0), None);
        assert_eq!(parse_range("bytes=-5", 0), None);
    }
}
