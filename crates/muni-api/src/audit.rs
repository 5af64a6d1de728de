//! # Audit Decorator
//!
//! Every command route declares its audit tag next to the route:
//!
//! ```ignore
//! .route("/multas", post(create_fine).layer(audit::layer(Module::Fines, AuditAction::Create)))
//! ```
//!
//! After the wrapped handler completes, one [`AuditEntry`] is written with
//! the caller, the tag, the request context (IP, user agent, session) and
//! the outcome. Handlers name the affected record through an
//! [`AuditSubject`] response extension; otherwise the first UUID in the
//! path is used. Error responses carry their message in an
//! [`AuditFailure`] extension set by [`crate::error::AppError`].
//!
//! Read routes never carry the layer. Audit-write failures are logged and
//! swallowed; they never alter the wrapped response.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower::{Layer, Service};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{CallerIdentity, Module};
use crate::state::{AuditEntry, Store};

/// Maximum stored length of the user agent.
const USER_AGENT_MAX: usize = 500;

/// Kind of audited command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Export,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::Export => "EXPORT",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Create => "Created",
            Self::Update => "Updated",
            Self::Delete => "Deleted",
            Self::Login => "Logged in to",
            Self::Logout => "Logged out of",
            Self::Export => "Exported data of",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an audited command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

/// Response extension naming the record a command affected.
#[derive(Debug, Clone, Copy)]
pub struct AuditSubject(pub Uuid);

/// Response extension carrying the error message of a failed command.
#[derive(Debug, Clone)]
pub struct AuditFailure(pub String);

/// Destination for audit entries: the in-memory log and, when configured,
/// the hash-chained `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditSink {
    entries: Store<AuditEntry>,
    pool: Option<PgPool>,
}

impl AuditSink {
    pub fn new(entries: Store<AuditEntry>, pool: Option<PgPool>) -> Self {
        Self { entries, pool }
    }

    /// Persist then publish an entry.
    pub async fn record(&self, entry: AuditEntry) -> Result<(), sqlx::Error> {
        if let Some(pool) = &self.pool {
            crate::db::audit::append(pool, &entry).await?;
        }
        let id = entry.id;
        self.entries.insert(id, entry);
        crate::commit::settle::<AuditEntry>(id);
        Ok(())
    }
}

/// Tag declared on a command route.
#[derive(Debug, Clone, Copy)]
pub struct AuditTag {
    pub module: Module,
    pub action: AuditAction,
}

/// Build the audit layer for a command route.
pub fn layer(module: Module, action: AuditAction) -> AuditLayer {
    AuditLayer {
        tag: AuditTag { module, action },
    }
}

/// Tower layer wrapping one route with the audit decorator.
#[derive(Debug, Clone, Copy)]
pub struct AuditLayer {
    tag: AuditTag,
}

impl<S> Layer<S> for AuditLayer {
    type Service = AuditService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuditService {
            inner,
            tag: self.tag,
        }
    }
}

/// Service produced by [`AuditLayer`].
#[derive(Debug, Clone)]
pub struct AuditService<S> {
    inner: S,
    tag: AuditTag,
}

impl<S> Service<Request> for AuditService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(audit_request(self.tag, inner, request))
    }
}

/// Client context captured before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub path_id: Option<Uuid>,
}

impl RequestContext {
    /// Capture the client context of a request.
    pub fn capture(request: &Request) -> Self {
        let socket = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let headers = request.headers();
        Self {
            ip_address: client_ip(headers, socket),
            user_agent: header_str(headers, "user-agent")
                .map(|ua| ua.chars().take(USER_AGENT_MAX).collect()),
            session_id: header_str(headers, "x-session-id").map(String::from),
            path_id: request
                .uri()
                .path()
                .split('/')
                .find_map(|segment| segment.parse::<Uuid>().ok()),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`, else the socket
/// address, else `unknown`.
pub fn client_ip(headers: &HeaderMap, socket: Option<String>) -> String {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    header_str(headers, "x-real-ip")
        .map(String::from)
        .or(socket)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the entry for a completed command.
pub fn build_entry(
    tag: AuditTag,
    caller: Option<&CallerIdentity>,
    context: RequestContext,
    response: &Response,
) -> AuditEntry {
    let entity_id = response
        .extensions()
        .get::<AuditSubject>()
        .map(|AuditSubject(id)| *id)
        .or(context.path_id);

    let mut description = format!("{} {}", tag.action.verb(), tag.module.entity_name());
    if let Some(id) = entity_id {
        description.push_str(&format!(" (ID: {id})"));
    }

    let status = response.status();
    let (outcome, error_message) = if status.is_success() || status.is_redirection() {
        (AuditOutcome::Success, None)
    } else {
        let message = response
            .extensions()
            .get::<AuditFailure>()
            .map(|AuditFailure(m)| m.clone())
            .unwrap_or_else(|| status.to_string());
        (AuditOutcome::Error, Some(message))
    };

    AuditEntry {
        id: Uuid::new_v4(),
        username: caller
            .map(|c| c.username.clone())
            .unwrap_or_else(|| "anonymous".to_string()),
        personnel_document: caller.and_then(|c| c.document.clone()),
        action: tag.action,
        module: tag.module,
        entity: tag.module.entity_name().to_string(),
        entity_id,
        description,
        previous_values: None,
        new_values: None,
        ip_address: context.ip_address,
        user_agent: context.user_agent,
        session_id: context.session_id,
        occurred_at: Utc::now(),
        outcome,
        error_message,
    }
}

async fn audit_request<S>(tag: AuditTag, mut inner: S, request: Request) -> Result<Response, Infallible>
where
    S: Service<Request, Response = Response, Error = Infallible>,
{
    let sink = request.extensions().get::<AuditSink>().cloned();
    let caller = request.extensions().get::<CallerIdentity>().cloned();
    let context = RequestContext::capture(&request);

    let response = inner.call(request).await?;

    match sink {
        Some(sink) => {
            let entry = build_entry(tag, caller.as_ref(), context, &response);
            if let Err(e) = sink.record(entry).await {
                tracing::warn!(
                    module = %tag.module,
                    action = %tag.action,
                    error = %e,
                    "failed to write audit entry"
                );
            }
        }
        None => tracing::warn!(module = %tag.module, "audit sink missing from request extensions"),
    }

    Ok(response)
}
