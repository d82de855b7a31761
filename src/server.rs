use std::collections::HashMap;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::error;

use crate::collector::Collector;
use crate::error::IngestError;

/// Build the ingestion router: `POST {base_path}/{tag}`. Anything after the
/// tag segment of the path is ignored.
pub fn router(collector: Collector, base_path: &str) -> Router {
    let base = base_path.trim_end_matches('/');
    Router::new()
        .route(&format!("{base}/{{tag}}"), post(ingest_handler))
        .route(&format!("{base}/{{tag}}/"), post(ingest_handler))
        .route(&format!("{base}/{{tag}}/{{*rest}}"), post(ingest_handler))
        .with_state(collector)
}

async fn ingest_handler(
    State(collector): State<Collector>,
    Path(params): Path<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let tag = params.get("tag").map(String::as_str).unwrap_or_default();
    let content_type = header_str(&headers, header::CONTENT_TYPE);
    let content_encoding = header_str(&headers, header::CONTENT_ENCODING);

    match collector.ingest(tag, content_type, content_encoding, &body) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub fn status_code(error: &IngestError) -> StatusCode {
    match error {
        IngestError::InvalidTag(_)
        | IngestError::EmptyBody
        | IngestError::Decompress(_)
        | IngestError::Decode(_) => StatusCode::BAD_REQUEST,
        IngestError::UnsupportedMediaType(_) => StatusCode::EXPECTATION_FAILED,
        IngestError::NoMatchingPipeline(_) => StatusCode::NOT_FOUND,
        IngestError::FilterRejected(_) => StatusCode::FORBIDDEN,
        IngestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("{}", self);
            return (status, self.to_string()).into_response();
        }
        status.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TagError;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&IngestError::EmptyBody), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_code(&IngestError::InvalidTag(TagError::Empty)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_code(&IngestError::UnsupportedMediaType("text/plain".into())),
            StatusCode::EXPECTATION_FAILED
        );
        assert_eq!(
            status_code(&IngestError::NoMatchingPipeline("a".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_code(&IngestError::FilterRejected("a".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_code(&IngestError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
