//! HTTP Range and conditional request handling for file streaming
//!
//! Implements single-range RFC 7233 requests plus the RFC 7232 validators
//! (`If-Match`, `If-None-Match`, `If-Modified-Since`, `If-Unmodified-Since`,
//! `If-Range`). Multi-range requests are served as the full entity.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use chrono::{DateTime, Utc};
use undertow_core::Metainfo;
use undertow_core::projection::mime_type_for;

use crate::error::ApiError;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Validators and metadata of a streamable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentInfo {
    pub length: u64,
    pub content_type: String,
    /// Strong entity tag, quoted
    pub etag: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl ContentInfo {
    /// Content info for file `index` of a torrent.
    ///
    /// The entity tag is derived from the info-hash, so it only changes when
    /// the content does. `Last-Modified` uses the descriptor's creation date.
    pub fn for_file(metainfo: &Metainfo, index: usize) -> Option<Self> {
        let file = metainfo.files.get(index)?;
        let content_type = match mime_type_for(&file.display_path()) {
            mime if mime.is_empty() => FALLBACK_CONTENT_TYPE.to_string(),
            mime => mime,
        };
        Some(Self {
            length: file.length,
            content_type,
            etag: format!("\"{}-{index}\"", metainfo.info_hash),
            last_modified: metainfo
                .creation_date
                .filter(|seconds| *seconds > 0)
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
        })
    }
}

/// Inclusive byte range within an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Interpretation of a `Range` header against an entity length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    Satisfiable(ByteRange),
    Unsatisfiable,
    /// Malformed or multi-range; the full entity is served
    Ignored,
}

/// Parse a `Range` header value against `total_size`
///
/// # Examples
/// ```
/// use undertow_web::handlers::range::{ByteRange, RangeSpec, parse_range_header};
/// assert_eq!(
///     parse_range_header("bytes=100-199", 1000),
///     RangeSpec::Satisfiable(ByteRange { start: 100, end: 199 })
/// );
/// ```
pub fn parse_range_header(range: &str, total_size: u64) -> RangeSpec {
    let Some(range_spec) = range.trim().strip_prefix("bytes=") else {
        return RangeSpec::Ignored;
    };
    if range_spec.contains(',') {
        return RangeSpec::Ignored;
    }
    let Some((start_str, end_str)) = range_spec.split_once('-') else {
        return RangeSpec::Ignored;
    };
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        // Suffix form: the last N bytes
        let Ok(suffix) = end_str.parse::<u64>() else {
            return RangeSpec::Ignored;
        };
        if suffix == 0 || total_size == 0 {
            return RangeSpec::Unsatisfiable;
        }
        return RangeSpec::Satisfiable(ByteRange {
            start: total_size - suffix.min(total_size),
            end: total_size - 1,
        });
    }

    let Ok(start) = start_str.parse::<u64>() else {
        return RangeSpec::Ignored;
    };
    let end = if end_str.is_empty() {
        u64::MAX
    } else {
        match end_str.parse::<u64>() {
            Ok(end) if end >= start => end,
            _ => return RangeSpec::Ignored,
        }
    };
    if start >= total_size {
        return RangeSpec::Unsatisfiable;
    }
    RangeSpec::Satisfiable(ByteRange {
        start,
        end: end.min(total_size - 1),
    })
}

/// What to send for a request after evaluating its validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOutcome {
    Full,
    Partial(ByteRange),
    NotModified,
    PreconditionFailed,
    Unsatisfiable,
}

impl ContentOutcome {
    /// Byte window of the body to send, if any.
    pub fn body_window(&self, length: u64) -> Option<(u64, u64)> {
        match self {
            ContentOutcome::Full => Some((0, length)),
            ContentOutcome::Partial(range) => Some((range.start, range.len())),
            _ => None,
        }
    }
}

/// Evaluates conditional and range headers of a GET/HEAD request.
pub fn evaluate(headers: &HeaderMap, info: &ContentInfo) -> ContentOutcome {
    let last_modified = info.last_modified;

    match header_str(headers, header::IF_MATCH) {
        Some(if_match) => {
            if !etag_list_matches(if_match, &info.etag, true) {
                return ContentOutcome::PreconditionFailed;
            }
        }
        None => {
            if let (Some(since), Some(modified)) =
                (header_date(headers, header::IF_UNMODIFIED_SINCE), last_modified)
            {
                if modified > since {
                    return ContentOutcome::PreconditionFailed;
                }
            }
        }
    }

    match header_str(headers, header::IF_NONE_MATCH) {
        Some(if_none_match) => {
            if etag_list_matches(if_none_match, &info.etag, false) {
                return ContentOutcome::NotModified;
            }
        }
        None => {
            if let (Some(since), Some(modified)) =
                (header_date(headers, header::IF_MODIFIED_SINCE), last_modified)
            {
                if modified <= since {
                    return ContentOutcome::NotModified;
                }
            }
        }
    }

    let Some(range) = header_str(headers, header::RANGE) else {
        return ContentOutcome::Full;
    };
    if !if_range_holds(headers, info) {
        return ContentOutcome::Full;
    }
    match parse_range_header(range, info.length) {
        RangeSpec::Satisfiable(range) => ContentOutcome::Partial(range),
        RangeSpec::Unsatisfiable => ContentOutcome::Unsatisfiable,
        RangeSpec::Ignored => ContentOutcome::Full,
    }
}

/// Builds the response for an evaluated request around `body`.
///
/// # Errors
///
/// - `ApiError::Internal` - A header value could not be encoded
pub fn build_content_response(
    outcome: ContentOutcome,
    info: &ContentInfo,
    body: Body,
) -> Result<Response<Body>, ApiError> {
    let mut response = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, info.etag.as_str());
    if let Some(modified) = info.last_modified {
        response = response.header(header::LAST_MODIFIED, http_date(modified));
    }

    let response = match outcome {
        ContentOutcome::Full => response
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, info.content_type.as_str())
            .header(header::CONTENT_LENGTH, info.length)
            .body(body),
        ContentOutcome::Partial(range) => response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, info.content_type.as_str())
            .header(header::CONTENT_LENGTH, range.len())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", range.start, range.end, info.length),
            )
            .body(body),
        ContentOutcome::NotModified => response.status(StatusCode::NOT_MODIFIED).body(Body::empty()),
        ContentOutcome::PreconditionFailed => response
            .status(StatusCode::PRECONDITION_FAILED)
            .body(Body::empty()),
        ContentOutcome::Unsatisfiable => response
            .status(StatusCode::RANGE_NOT_SATISFIABLE)
            .header(header::CONTENT_RANGE, format!("bytes */{}", info.length))
            .body(Body::empty()),
    };

    response.map_err(|e| ApiError::Internal {
        reason: format!("failed to build response: {e}"),
    })
}

/// Formats a timestamp as an IMF-fixdate.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an IMF-fixdate header value.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|value: &HeaderValue| value.to_str().ok())
}

fn header_date(headers: &HeaderMap, name: header::HeaderName) -> Option<DateTime<Utc>> {
    header_str(headers, name).and_then(parse_http_date)
}

fn if_range_holds(headers: &HeaderMap, info: &ContentInfo) -> bool {
    let Some(if_range) = header_str(headers, header::IF_RANGE) else {
        return true;
    };
    let if_range = if_range.trim();
    if if_range.starts_with('"') || if_range.starts_with("W/") {
        return etag_matches(if_range, &info.etag, true);
    }
    match (parse_http_date(if_range), info.last_modified) {
        (Some(date), Some(modified)) => date == modified,
        _ => false,
    }
}

fn etag_list_matches(list: &str, etag: &str, strong: bool) -> bool {
    list.split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || etag_matches(candidate, etag, strong))
}

fn etag_matches(candidate: &str, etag: &str, strong: bool) -> bool {
    let weak = |tag: &str| tag.starts_with("W/");
    if strong && (weak(candidate) || weak(etag)) {
        return false;
    }
    candidate.trim_start_matches("W/") == etag.trim_start_matches("W/")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn info() -> ContentInfo {
        ContentInfo {
            length: 1000,
            content_type: "video/mp4".to_string(),
            etag: "\"abc-0\"".to_string(),
            last_modified: Utc.timestamp_opt(1_700_000_000, 0).single(),
        }
    }

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn range(start: u64, end: u64) -> RangeSpec {
        RangeSpec::Satisfiable(ByteRange { start, end })
    }

    #[test]
    fn test_parse_range_header_valid() {
        assert_eq!(parse_range_header("bytes=100-199", 1000), range(100, 199));
    }

    #[test]
    fn test_parse_range_header_open_end() {
        assert_eq!(parse_range_header("bytes=500-", 1000), range(500, 999));
    }

    #[test]
    fn test_parse_range_header_suffix() {
        assert_eq!(parse_range_header("bytes=-100", 1000), range(900, 999));
        assert_eq!(parse_range_header("bytes=-5000", 1000), range(0, 999));
        assert_eq!(parse_range_header("bytes=-0", 1000), RangeSpec::Unsatisfiable);
    }

    #[test]
    fn test_parse_range_header_clamps_end() {
        assert_eq!(parse_range_header("bytes=900-5000", 1000), range(900, 999));
    }

    #[test]
    fn test_parse_range_header_invalid() {
        assert_eq!(parse_range_header("invalid", 1000), RangeSpec::Ignored);
        assert_eq!(parse_range_header("bytes=abc-", 1000), RangeSpec::Ignored);
        assert_eq!(parse_range_header("bytes=200-100", 1000), RangeSpec::Ignored);
        assert_eq!(parse_range_header("bytes=0-1,5-6", 1000), RangeSpec::Ignored);
    }

    #[test]
    fn test_parse_range_header_beyond_end() {
        assert_eq!(parse_range_header("bytes=1000-", 1000), RangeSpec::Unsatisfiable);
        assert_eq!(parse_range_header("bytes=0-", 0), RangeSpec::Unsatisfiable);
    }

    #[test]
    fn test_evaluate_plain_and_ranged() {
        let info = info();
        assert_eq!(evaluate(&HeaderMap::new(), &info), ContentOutcome::Full);
        assert_eq!(
            evaluate(&headers(&[(header::RANGE, "bytes=10-19")]), &info),
            ContentOutcome::Partial(ByteRange { start: 10, end: 19 })
        );
        assert_eq!(
            evaluate(&headers(&[(header::RANGE, "bytes=2000-")]), &info),
            ContentOutcome::Unsatisfiable
        );
    }

    #[test]
    fn test_evaluate_if_none_match() {
        let info = info();
        assert_eq!(
            evaluate(&headers(&[(header::IF_NONE_MATCH, "\"abc-0\"")]), &info),
            ContentOutcome::NotModified
        );
        assert_eq!(
            evaluate(&headers(&[(header::IF_NONE_MATCH, "W/\"abc-0\"")]), &info),
            ContentOutcome::NotModified
        );
        assert_eq!(
            evaluate(&headers(&[(header::IF_NONE_MATCH, "\"other\"")]), &info),
            ContentOutcome::Full
        );
    }

    #[test]
    fn test_evaluate_if_modified_since() {
        let info = info();
        let modified = info.last_modified.unwrap();
        assert_eq!(
            evaluate(&headers(&[(header::IF_MODIFIED_SINCE, &http_date(modified))]), &info),
            ContentOutcome::NotModified
        );
        let earlier = modified - chrono::Duration::seconds(60);
        assert_eq!(
            evaluate(&headers(&[(header::IF_MODIFIED_SINCE, &http_date(earlier))]), &info),
            ContentOutcome::Full
        );
    }

    #[test]
    fn test_evaluate_preconditions() {
        let info = info();
        assert_eq!(
            evaluate(&headers(&[(header::IF_MATCH, "\"nope\"")]), &info),
            ContentOutcome::PreconditionFailed
        );
        assert_eq!(evaluate(&headers(&[(header::IF_MATCH, "*")]), &info), ContentOutcome::Full);
        let earlier = info.last_modified.unwrap() - chrono::Duration::seconds(1);
        assert_eq!(
            evaluate(&headers(&[(header::IF_UNMODIFIED_SINCE, &http_date(earlier))]), &info),
            ContentOutcome::PreconditionFailed
        );
    }

    #[test]
    fn test_evaluate_if_range() {
        let info = info();
        assert_eq!(
            evaluate(
                &headers(&[(header::RANGE, "bytes=0-9"), (header::IF_RANGE, "\"abc-0\"")]),
                &info
            ),
            ContentOutcome::Partial(ByteRange { start: 0, end: 9 })
        );
        assert_eq!(
            evaluate(
                &headers(&[(header::RANGE, "bytes=0-9"), (header::IF_RANGE, "\"stale\"")]),
                &info
            ),
            ContentOutcome::Full
        );
    }

    #[test]
    fn test_http_date_round_trip() {
        let date = info().last_modified.unwrap();
        let text = http_date(date);
        assert_eq!(text, "Tue, 14 Nov 2023 22:13:20 GMT");
        assert_eq!(parse_http_date(&text), Some(date));
    }

    #[test]
    fn test_build_unsatisfiable_response() {
        let response =
            build_content_response(ContentOutcome::Unsatisfiable, &info(), Body::empty()).unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[test]
    fn test_build_partial_response_headers() {
        let outcome = ContentOutcome::Partial(ByteRange { start: 100, end: 199 });
        let response = build_content_response(outcome, &info(), Body::empty()).unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert_eq!(response.headers()[header::LAST_MODIFIED], "Tue, 14 Nov 2023 22:13:20 GMT");
    }
}
