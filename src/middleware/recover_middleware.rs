// Package http provides panic recovery middleware.

use std::panic;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use futures::FutureExt;
use tracing::error;

use crate::metrics::Counters;

const REASON_HEADER_KEY: &str = "X-Error-Reason";
const INTERNAL_SERVER_ERROR_RESPONSE_BODY: &[u8] = b"{\"status\":500,\"error\":\"Internal Server Error\",\"message\":\"Something went wrong. Please contact support immediately.\"}";

/// PanicRecoverMiddleware recovers from panics in HTTP handlers. When built
/// with `with_metrics`, a recovered panic also increments the node's
/// `oram_panics_total` counter.
pub struct PanicRecoverMiddleware {
    metrics: Option<Arc<Counters>>,
}

impl PanicRecoverMiddleware {
    /// Creates a new panic recovery middleware with no metrics wired in.
    pub fn new() -> Self {
        Self { metrics: None }
    }

    /// Creates a panic recovery middleware that records every recovered
    /// panic against `metrics`.
    pub fn with_metrics(metrics: Arc<Counters>) -> Self {
        Self { metrics: Some(metrics) }
    }

    /// Middleware function that handles panics.
    async fn middleware(State(metrics): State<Option<Arc<Counters>>>, request: Request, next: Next) -> Response {
        // Use catch_unwind to catch panics in async context
        let result = panic::AssertUnwindSafe(next.run(request)).catch_unwind().await;

        match result {
            Ok(response) => response,
            Err(panic_info) => {
                if let Some(counters) = &metrics {
                    counters.inc_panics();
                }

                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    format!("panic: {}", s)
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    format!("panic: {}", s)
                } else {
                    "panic: unknown".to_string()
                };

                error!(
                    error = %panic_msg,
                    "panic recovered in HTTP handler"
                );

                // Build error response
                let mut headers = HeaderMap::new();
                
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(REASON_HEADER_KEY.as_bytes()),
                    HeaderValue::from_str(&panic_msg),
                ) {
                    headers.insert(name, value);
                }

                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .header("content-type", "application/json")
                    .header("content-length", INTERNAL_SERVER_ERROR_RESPONSE_BODY.len())
                    .body(INTERNAL_SERVER_ERROR_RESPONSE_BODY.to_vec().into())
                    .map(|mut resp| {
                        *resp.headers_mut() = headers;
                        resp
                    })
                    .unwrap_or_else(|_| {
                        Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .body(Vec::new().into())
                            .unwrap()
                    })
            }
        }
    }
}

impl Default for PanicRecoverMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

// Implementation of Middleware trait
impl crate::middleware::middleware::Middleware for PanicRecoverMiddleware {
    fn apply(&self, router: axum::Router) -> axum::Router {
        router.layer(axum::middleware::from_fn_with_state(
            self.metrics.clone(),
            Self::middleware,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use crate::middleware::middleware::Middleware;
    use tower::ServiceExt;

    async fn panics() -> &'static str {
        panic!("boom");
    }

    #[tokio::test]
    async fn recovers_panic_and_records_it_on_the_given_counters() {
        let metrics = Arc::new(Counters::default());
        let router = axum::Router::new().route("/boom", get(panics));
        let router = PanicRecoverMiddleware::with_metrics(metrics.clone()).apply(router);

        let response = router
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            metrics.panics_total.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn without_metrics_still_recovers() {
        let router = axum::Router::new().route("/boom", get(panics));
        let router = PanicRecoverMiddleware::new().apply(router);

        let response = router
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
