//! Server-side glue: `OramError` -> HTTP response, and request-id extraction.

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rand::RngCore;

use crate::error::OramError;
use crate::model::RequestId;

use super::{status_for, ErrorBody, REQUEST_ID_HEADER};

/// Newtype so `OramError` can implement axum's `IntoResponse` without this
/// crate owning `axum`'s traits for a foreign type.
pub struct RpcError(pub OramError);

impl From<OramError> for RpcError {
    fn from(err: OramError) -> Self {
        Self(err)
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = ErrorBody::from_oram_error(&self.0);
        (status, Json(body)).into_response()
    }
}

/// Reads `X-Request-Id` from the incoming headers, generating a fresh one if
/// the caller omitted it (the router is always the first hop to see a
/// request, so it is usually the one minting this).
pub fn request_id_from_headers(headers: &HeaderMap) -> RequestId {
    if let Some(value) = headers.get(REQUEST_ID_HEADER) {
        if let Ok(s) = value.to_str() {
            if !s.is_empty() {
                return s.to_string();
            }
        }
    }
    let mut raw = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut raw);
    hex::encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_generates_nonempty_id() {
        let headers = HeaderMap::new();
        let id = request_id_from_headers(&headers);
        assert!(!id.is_empty());
    }

    #[test]
    fn present_header_is_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, "abc-123".parse().unwrap());
        assert_eq!(request_id_from_headers(&headers), "abc-123");
    }
}
