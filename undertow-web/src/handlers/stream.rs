//! File streaming handler.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;

use super::find_session;
use super::range::{ContentInfo, build_content_response, evaluate};
use crate::error::ApiError;
use crate::server::AppState;

/// `GET|HEAD /torrents/{info_hash}/{*path}`: streams one file with range support.
///
/// Waits for metadata first; dropping the request abandons the wait.
pub async fn stream_file(
    State(state): State<AppState>,
    Path((info_hash, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session = find_session(&state, &info_hash)?;
    let metainfo = session.wait_for_metadata().await?;
    let file_not_found = || ApiError::FileNotFound { path: path.clone() };
    let (index, _) = metainfo.file_by_display_path(&path).ok_or_else(file_not_found)?;
    let info = ContentInfo::for_file(&metainfo, index).ok_or_else(file_not_found)?;

    let outcome = evaluate(&headers, &info);
    let body = match outcome.body_window(info.length) {
        Some((start, len)) if method != Method::HEAD => {
            let mut reader = state
                .engine
                .open_file(&session, index, state.config.read_options())
                .await?;
            reader.seek(start);
            tracing::debug!(info_hash = %metainfo.info_hash, path = %path, start, len, "Streaming file");
            Body::from_stream(reader.into_stream(len))
        }
        _ => Body::empty(),
    };

    build_content_response(outcome, &info, body)
}
