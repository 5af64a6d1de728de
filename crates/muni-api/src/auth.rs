//! # Authentication & Authorization Middleware
//!
//! Bearer token middleware with authority-based access control.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {secret}               system administrator ("admin")
//! Bearer {username}:{password}  named active user, authorities from roles
//! ```
//!
//! When no `AUTH_TOKEN` is configured every request runs as `admin` with
//! every authority.
//!
//! ## Authorities
//!
//! Permission keys follow `{MODULE}_{LEVEL}` (e.g. `MULTAS_WRITE`).
//! `GESTIONAR` implies every level of its module; `WRITE` and `DELETE`
//! each imply `READ`.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use muni_core::Actor;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};
use crate::state::AppState;

/// Username of the built-in administrator.
pub const ADMIN_USERNAME: &str = "admin";

// ── Modules & access levels ─────────────────────────────────────────────────

/// Functional area of the back office. Each has its own authorities and
/// audit tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Module {
    Taxpayers,
    Taxes,
    Declarations,
    Withholdings,
    Vouchers,
    Fines,
    Levies,
    Payments,
    Services,
    Transactions,
    Personnel,
    Roles,
    Audit,
    Dashboard,
}

impl Module {
    pub const ALL: [Module; 14] = [
        Self::Taxpayers,
        Self::Taxes,
        Self::Declarations,
        Self::Withholdings,
        Self::Vouchers,
        Self::Fines,
        Self::Levies,
        Self::Payments,
        Self::Services,
        Self::Transactions,
        Self::Personnel,
        Self::Roles,
        Self::Audit,
        Self::Dashboard,
    ];

    /// Authority prefix and audit module name.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Taxpayers => "CONTRIBUYENTES",
            Self::Taxes => "IMPUESTOS",
            Self::Declarations => "DECLARACIONES",
            Self::Withholdings => "RETENCIONES",
            Self::Vouchers => "COMPROBANTES",
            Self::Fines => "MULTAS",
            Self::Levies => "TASAS",
            Self::Payments => "PAGOS",
            Self::Services => "SERVICIOS",
            Self::Transactions => "TRANSACCIONES",
            Self::Personnel => "PERSONAL",
            Self::Roles => "ROLES",
            Self::Audit => "AUDITORIA",
            Self::Dashboard => "DASHBOARD",
        }
    }

    /// Singular noun used in audit descriptions ("Created fine").
    pub fn entity_name(&self) -> &'static str {
        match self {
            Self::Taxpayers => "taxpayer",
            Self::Taxes => "tax",
            Self::Declarations => "declaration",
            Self::Withholdings => "withholding",
            Self::Vouchers => "voucher",
            Self::Fines => "fine",
            Self::Levies => "levy",
            Self::Payments => "payment",
            Self::Services => "service",
            Self::Transactions => "transaction",
            Self::Personnel => "personnel",
            Self::Roles => "role",
            Self::Audit => "audit log",
            Self::Dashboard => "dashboard",
        }
    }

    /// Parse an authority prefix such as `MULTAS`.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Access level within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Access {
    Read,
    Write,
    Delete,
    #[serde(rename = "GESTIONAR")]
    Manage,
}

impl Access {
    pub const ALL: [Access; 4] = [Self::Read, Self::Write, Self::Delete, Self::Manage];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Delete => "DELETE",
            Self::Manage => "GESTIONAR",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Read => "Consultar",
            Self::Write => "Registrar y modificar",
            Self::Delete => "Eliminar",
            Self::Manage => "Gestionar",
        }
    }
}

/// Build the authority key for a module and level, e.g. `MULTAS_WRITE`.
pub fn authority(module: Module, access: Access) -> String {
    format!("{}_{}", module.key(), access.key())
}

/// Permission catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    /// Authority key, e.g. `MULTAS_WRITE`.
    pub key: String,
    /// Human-readable name.
    pub name: String,
    pub module: Module,
    pub access: Access,
}

/// Every module × level permission, in catalogue order.
pub fn permission_catalogue() -> Vec<Permission> {
    Module::ALL
        .into_iter()
        .flat_map(|module| {
            Access::ALL.into_iter().map(move |access| Permission {
                key: authority(module, access),
                name: format!("{} {}", access.label(), module.entity_name()),
                module,
                access,
            })
        })
        .collect()
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Authorities held by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorities {
    /// Administrator: every authority.
    All,
    /// Keys granted through the user's roles.
    Granted(BTreeSet<String>),
}

/// Identity of the authenticated caller, injected by [`auth_middleware`]
/// and extracted in handlers via `FromRequestParts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: String,
    /// Personnel document of the employee linked to the user, if any.
    pub document: Option<String>,
    pub authorities: Authorities,
}

impl CallerIdentity {
    /// The built-in administrator.
    pub fn admin() -> Self {
        Self {
            username: ADMIN_USERNAME.to_string(),
            document: None,
            authorities: Authorities::All,
        }
    }

    /// Whether the caller may perform `access` on `module`.
    pub fn can(&self, module: Module, access: Access) -> bool {
        let granted = match &self.authorities {
            Authorities::All => return true,
            Authorities::Granted(keys) => keys,
        };
        let holds = |level: Access| granted.contains(&authority(module, level));
        if holds(Access::Manage) || holds(access) {
            return true;
        }
        access == Access::Read && (holds(Access::Write) || holds(Access::Delete))
    }

    /// Return 403 unless the caller may perform `access` on `module`.
    pub fn require(&self, module: Module, access: Access) -> Result<(), AppError> {
        if self.can(module, access) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "authority '{}' required, caller '{}' does not hold it",
                authority(module, access),
                self.username
            )))
        }
    }

    /// The domain actor for state-changing operations.
    pub fn actor(&self) -> Actor {
        let actor = Actor::new(self.username.clone());
        match &self.document {
            Some(document) => actor.with_document(document.clone()),
            None => actor,
        }
    }

    /// READ access per module, keyed by module name.
    pub fn access_map(&self) -> BTreeMap<&'static str, bool> {
        Module::ALL
            .into_iter()
            .map(|m| (m.key(), self.can(m, Access::Read)))
            .collect()
    }
}

impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

// ── Token Validation ────────────────────────────────────────────────────────

/// Constant-time comparison of bearer secrets.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Resolve a bearer token to a caller.
///
/// The bare secret authenticates the administrator. `{username}:{password}`
/// authenticates an active user against their stored password digest; their
/// authorities are the union of the permissions of their roles.
pub fn resolve_token(
    provided: &str,
    expected_secret: &str,
    state: &AppState,
) -> Result<CallerIdentity, String> {
    if constant_time_token_eq(provided, expected_secret) {
        return Ok(CallerIdentity::admin());
    }

    let (username, password) = provided
        .split_once(':')
        .ok_or_else(|| "invalid bearer token".to_string())?;

    let user = state
        .users
        .find(|u| u.username == username)
        .ok_or_else(|| format!("unknown user: {username}"))?;
    if !verify_password(password, &user.password_hash) {
        return Err("invalid bearer token".into());
    }
    if !user.active {
        return Err(format!("user {username} is inactive"));
    }

    let granted: BTreeSet<String> = user
        .role_ids
        .iter()
        .filter_map(|role_id| state.roles.get(role_id))
        .flat_map(|role| role.permissions.into_iter())
        .collect();
    let document = state
        .personnel
        .find(|p| p.user_id == Some(user.id))
        .map(|p| p.document);

    Ok(CallerIdentity {
        username: user.username,
        document,
        authorities: Authorities::Granted(granted),
    })
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Authenticate the request and inject its [`CallerIdentity`].
///
/// When `AUTH_TOKEN` is not configured, the administrator identity is
/// injected for every request (development mode).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let expected = match state.config.auth_token.clone() {
        Some(token) => token,
        None => {
            request.extensions_mut().insert(CallerIdentity::admin());
            return next.run(request).await;
        }
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) if value.starts_with("Bearer ") => {
            match resolve_token(&value[7..], &expected, &state) {
                Ok(identity) => {
                    request.extensions_mut().insert(identity);
                    next.run(request).await
                }
                Err(msg) => {
                    tracing::warn!(reason = %msg, "authentication failed: invalid bearer token");
                    unauthorized_response(&msg)
                }
            }
        }
        Some(_) => {
            tracing::warn!("authentication failed: non-Bearer authorization scheme");
            unauthorized_response("authorization header must use Bearer scheme")
        }
        None => {
            tracing::warn!("authentication failed: missing authorization header");
            unauthorized_response("missing authorization header")
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

// ── Passwords ───────────────────────────────────────────────────────────────

/// Random alphanumeric password of `len` characters.
pub fn generate_password(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Salted SHA-256 digest, stored as `{salt}${hex digest}`.
pub fn hash_password(password: &str) -> String {
    let salt = generate_password(16);
    format!("{salt}${}", salted_digest(&salt, password))
}

/// Check a password against a digest produced by [`hash_password`].
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, digest)) => constant_time_token_eq(&salted_digest(salt, password), digest),
        None => false,
    }
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppConfig, Role, User};
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn state_with_token(token: Option<&str>) -> AppState {
        AppState::with_config(AppConfig {
            auth_token: token.map(String::from),
            ..AppConfig::default()
        })
    }

    fn test_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/test",
                get(|caller: CallerIdentity| async move { caller.username }),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    const PASSWORD: &str = "Clave123";

    fn add_user(state: &AppState, username: &str, permissions: &[&str], active: bool) -> Uuid {
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: format!("role-{username}"),
            description: None,
            permissions: permissions.iter().map(|p| p.to_string()).collect(),
            created_at: now,
            updated_at: now,
        };
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@municipio.local"),
            password_hash: hash_password(PASSWORD),
            active,
            role_ids: vec![role.id],
            created_at: now,
        };
        state.roles.insert(role.id, role);
        let id = user.id;
        state.users.insert(id, user);
        id
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/test");
        if let Some(value) = auth {
            builder = builder.header("Authorization", value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn auth_disabled_runs_as_admin() {
        let (status, body) = call(test_app(state_with_token(None)), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[tokio::test]
    async fn bare_secret_is_admin() {
        let app = test_app(state_with_token(Some("s3cret")));
        let (status, body) = call(app, Some("Bearer s3cret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "admin");
    }

    #[tokio::test]
    async fn missing_authorization_header_rejected() {
        let (status, body) = call(test_app(state_with_token(Some("s3cret"))), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("missing"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let app = test_app(state_with_token(Some("s3cret")));
        let (status, body) = call(app, Some("Bearer nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("invalid"));
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let app = test_app(state_with_token(Some("s3cret")));
        let (status, body) = call(app, Some("Basic dXNlcjpwYXNz")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer"));
    }

    #[tokio::test]
    async fn user_token_resolves_named_user() {
        let state = state_with_token(Some("s3cret"));
        add_user(&state, "cajero", &["PAGOS_WRITE"], true);
        let (status, body) = call(test_app(state), Some("Bearer cajero:Clave123")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "cajero");
    }

    #[tokio::test]
    async fn user_with_admin_secret_as_password_rejected() {
        let state = state_with_token(Some("s3cret"));
        add_user(&state, "cajero", &["PAGOS_WRITE"], true);
        let (status, body) = call(test_app(state), Some("Bearer cajero:s3cret")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("invalid"));
    }

    #[tokio::test]
    async fn wrong_user_password_rejected() {
        let state = state_with_token(Some("s3cret"));
        add_user(&state, "cajero", &["PAGOS_WRITE"], true);
        let (status, _) = call(test_app(state), Some("Bearer cajero:clave123")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn inactive_user_rejected() {
        let state = state_with_token(Some("s3cret"));
        add_user(&state, "baja", &["PAGOS_WRITE"], false);
        let (status, _) = call(test_app(state), Some("Bearer baja:Clave123")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_user_rejected() {
        let app = test_app(state_with_token(Some("s3cret")));
        let (status, body) = call(app, Some("Bearer ghost:Clave123")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("unknown user"));
    }

    #[test]
    fn user_authorities_come_from_roles() {
        let state = state_with_token(Some("k"));
        add_user(&state, "ana", &["MULTAS_WRITE", "PAGOS_GESTIONAR"], true);
        let caller = resolve_token("ana:Clave123", "k", &state).unwrap();
        assert!(caller.can(Module::Fines, Access::Write));
        assert!(caller.can(Module::Fines, Access::Read));
        assert!(!caller.can(Module::Fines, Access::Delete));
        assert!(caller.can(Module::Payments, Access::Delete));
        assert!(!caller.can(Module::Levies, Access::Read));
    }

    #[test]
    fn delete_implies_read_only() {
        let caller = CallerIdentity {
            username: "x".into(),
            document: None,
            authorities: Authorities::Granted(["TASAS_DELETE".to_string()].into()),
        };
        assert!(caller.can(Module::Levies, Access::Read));
        assert!(caller.can(Module::Levies, Access::Delete));
        assert!(!caller.can(Module::Levies, Access::Write));
    }

    #[test]
    fn require_reports_missing_authority() {
        let caller = CallerIdentity {
            username: "x".into(),
            document: None,
            authorities: Authorities::Granted(BTreeSet::new()),
        };
        let err = caller.require(Module::Fines, Access::Write).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(ref m) if m.contains("MULTAS_WRITE")));
    }

    #[test]
    fn catalogue_covers_every_module_and_level() {
        let catalogue = permission_catalogue();
        assert_eq!(catalogue.len(), Module::ALL.len() * Access::ALL.len());
        assert!(catalogue.iter().any(|p| p.key == "MULTAS_GESTIONAR"));
        assert!(catalogue.iter().any(|p| p.key == "CONTRIBUYENTES_READ"));
    }

    #[test]
    fn access_map_lists_every_module() {
        let map = CallerIdentity::admin().access_map();
        assert_eq!(map.len(), Module::ALL.len());
        assert!(map.values().all(|v| *v));
    }

    #[test]
    fn actor_carries_document() {
        let caller = CallerIdentity {
            username: "ana".into(),
            document: Some("V-123".into()),
            authorities: Authorities::All,
        };
        let actor = caller.actor();
        assert_eq!(actor.username, "ana");
        assert_eq!(actor.document.as_deref(), Some("V-123"));
    }

    #[test]
    fn password_hash_verifies() {
        let stored = hash_password("Clave123");
        assert!(verify_password("Clave123", &stored));
        assert!(!verify_password("clave123", &stored));
        assert_ne!(hash_password("Clave123"), stored);
    }

    #[test]
    fn generated_password_length() {
        let p = generate_password(12);
        assert_eq!(p.len(), 12);
        assert!(p.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(constant_time_token_eq("abc", "abc"));
        assert!(!constant_time_token_eq("abc", "abcd"));
    }
}
