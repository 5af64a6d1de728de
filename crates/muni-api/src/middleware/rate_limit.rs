//! # Per-Client Rate Limiting
//!
//! Fixed-window rate limiter keyed by the peer socket address. Forwarding
//! headers are client-controlled and are never used as the key. The table
//! of tracked clients is bounded: expired windows are pruned when it fills,
//! and new clients are refused while it stays full.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parking_lot::Mutex;

use crate::error::{ErrorBody, ErrorDetail};

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u64,
    /// Window duration in seconds.
    pub window_secs: u64,
    /// Maximum number of clients tracked at once.
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1000,
            window_secs: 60,
            max_clients: 10_000,
        }
    }
}

/// Per-key rate limit state.
#[derive(Debug, Clone)]
struct BucketState {
    count: u64,
    window_start: Instant,
}

/// Shared rate limiter state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check if a request from the given key should be allowed.
    fn check(&self, key: &str) -> bool {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let window_secs = self.config.window_secs;
        let expired =
            |bucket: &BucketState| now.duration_since(bucket.window_start).as_secs() >= window_secs;

        if !buckets.contains_key(key) && buckets.len() >= self.config.max_clients {
            buckets.retain(|_, bucket| !expired(&*bucket));
            if buckets.len() >= self.config.max_clients {
                return false;
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert(BucketState {
            count: 0,
            window_start: now,
        });

        if expired(&*bucket) {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= self.config.max_requests {
            false
        } else {
            bucket.count += 1;
            true
        }
    }
}

/// Middleware that enforces per-client rate limits.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let key = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if !limiter.check(&key) {
            tracing::warn!(client = %key, "rate limit exceeded");
            let body = ErrorBody {
                error: ErrorDetail {
                    code: "RATE_LIMITED".to_string(),
                    message: "rate limit exceeded".to_string(),
                    details: None,
                },
            };
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::{Extension, Router};
    use tower::ServiceExt;

    fn limiter(max_requests: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs: 60,
            ..RateLimitConfig::default()
        })
    }

    fn limited_app(limiter: RateLimiter) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn(rate_limit_middleware))
            .layer(Extension(limiter))
    }

    fn request_from(peer: &str, forwarded_for: &str) -> Request {
        let mut request = Request::builder()
            .uri("/")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::empty())
            .unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = limiter(2);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.1"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert!(!limiter.check("10.0.0.1"));
    }

    #[test]
    fn zero_length_window_always_resets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window_secs: 0,
            ..RateLimitConfig::default()
        });
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
    }

    #[test]
    fn full_table_refuses_new_clients() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 10,
            window_secs: 60,
            max_clients: 2,
        });
        assert!(limiter.check("10.0.0.1"));
        assert!(limiter.check("10.0.0.2"));
        assert!(!limiter.check("10.0.0.3"));
        assert!(limiter.check("10.0.0.1"));
        assert_eq!(limiter.buckets.lock().len(), 2);
    }

    #[test]
    fn expired_windows_are_pruned_when_full() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_requests: 10,
            window_secs: 0,
            max_clients: 2,
        });
        for i in 0..50 {
            assert!(limiter.check(&format!("10.0.0.{i}")));
        }
        assert!(limiter.buckets.lock().len() <= 2);
    }

    #[tokio::test]
    async fn forwarded_for_rotation_does_not_reset_the_limit() {
        let app = limited_app(limiter(1));
        let first = app
            .clone()
            .oneshot(request_from("192.0.2.10:5000", "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app
            .clone()
            .oneshot(request_from("192.0.2.10:5001", "1.1.1.2"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let other_peer = app
            .oneshot(request_from("192.0.2.11:5000", "1.1.1.1"))
            .await
            .unwrap();
        assert_eq!(other_peer.status(), StatusCode::OK);
    }

    #[test]
    fn default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 1000);
        assert_eq!(config.window_secs, 60);
        assert_eq!(config.max_clients, 10_000);
    }
}
