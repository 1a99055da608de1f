// Request-rate-limiting HTTP middleware, fronting every RPC surface.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

pub type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket request limiter, shared across every handler on a router.
pub struct RateLimitMiddleware {
    limiter: Arc<DirectRateLimiter>,
}

impl RateLimitMiddleware {
    pub fn new(requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second.max(1)).unwrap());
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn middleware(
        State(limiter): State<Arc<DirectRateLimiter>>,
        request: Request,
        next: Next,
    ) -> Response {
        if limiter.check().is_err() {
            return (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response();
        }
        next.run(request).await
    }
}

impl crate::middleware::middleware::Middleware for RateLimitMiddleware {
    fn apply(&self, router: axum::Router) -> axum::Router {
        router.layer(axum::middleware::from_fn_with_state(
            self.limiter.clone(),
            Self::middleware,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_immediately_exhausted_quota() {
        let quota = Quota::per_second(NonZeroU32::new(1).unwrap());
        let limiter = RateLimiter::direct(quota);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
