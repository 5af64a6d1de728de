//! # Middleware
//!
//! Global layers applied to every route by [`crate::app`], outermost first:
//! HTTP tracing, request metrics, rate limiting. Authentication sits inside
//! them in [`crate::auth`]; the per-route audit decorator lives in
//! [`crate::audit`].

pub mod metrics;
pub mod rate_limit;
pub mod tracing_layer;
