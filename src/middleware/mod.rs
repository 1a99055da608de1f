pub mod middleware;
pub mod rate_limit_middleware;
pub mod recover_middleware;

pub use middleware::Middleware;
pub use rate_limit_middleware::RateLimitMiddleware;
pub use recover_middleware::PanicRecoverMiddleware;
