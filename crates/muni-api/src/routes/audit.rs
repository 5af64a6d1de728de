//! # Audit Log API
//!
//! Read access to the audit log under `/auditoria`. Entries are written by
//! [`crate::audit`]; nothing here mutates them.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{layer, AuditAction, AuditOutcome};
use crate::auth::{Access, CallerIdentity, Module};
use crate::db::audit::ChainIntegrityResult;
use crate::error::AppError;
use crate::export::Sheet;
use crate::extractors::{page_of, Page, PageParams};
use crate::state::{AppState, AuditEntry};

const MODULE: Module = Module::Audit;

/// Window of `/auditoria/estadisticas`.
const STATS_DAYS: i64 = 30;

/// Rows checked by `/auditoria/verificar`.
const VERIFY_LIMIT: i64 = 1_000_000;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Fecha",
    "Usuario",
    "Documento",
    "Acción",
    "Módulo",
    "Entidad",
    "ID Entidad",
    "Descripción",
    "IP",
    "Resultado",
    "Error",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AuditFilter {
    pub username: Option<String>,
    /// Module name, e.g. `MULTAS`.
    pub module: Option<String>,
    pub action: Option<AuditAction>,
    pub outcome: Option<AuditOutcome>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub ip: Option<String>,
    /// Matches the description, entity or error message.
    pub term: Option<String>,
}

impl AuditFilter {
    fn module(&self) -> Result<Option<Module>, AppError> {
        match self.module.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            None => Ok(None),
            Some(key) => parse_module(key)
                .map(Some)
                .ok_or_else(|| AppError::BadRequest(format!("unknown module: {key}"))),
        }
    }

    fn matches(&self, module: Option<Module>, e: &AuditEntry) -> bool {
        module.map_or(true, |m| e.module == m)
            && self
                .username
                .as_deref()
                .map_or(true, |u| e.username.eq_ignore_ascii_case(u.trim()))
            && self.action.map_or(true, |a| e.action == a)
            && self.outcome.map_or(true, |o| e.outcome == o)
            && super::within_dates(e.occurred_at.date_naive(), self.from, self.to)
            && super::matches_term(self.ip.as_deref(), &[e.ip_address.as_str()])
            && super::matches_term(
                self.term.as_deref(),
                &[
                    e.description.as_str(),
                    e.entity.as_str(),
                    e.error_message.as_deref().unwrap_or_default(),
                ],
            )
    }
}

/// Module from its authority key (`MULTAS`) or its serialized name (`FINES`).
fn parse_module(key: &str) -> Option<Module> {
    let key = key.to_uppercase();
    Module::from_key(&key)
        .or_else(|| serde_json::from_value(serde_json::Value::String(key)).ok())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuditStats {
    pub total: usize,
    pub last_24h: usize,
    pub distinct_users: usize,
    pub errors: usize,
    pub by_module: BTreeMap<String, usize>,
    pub by_user: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    /// Hour of day (UTC) → entries.
    pub by_hour: BTreeMap<u32, usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auditoria/logs", get(list_logs))
        .route("/auditoria/logs/{id}", get(get_log))
        .route("/auditoria/estadisticas", get(audit_stats))
        .route("/auditoria/errores", get(list_errors))
        .route(
            "/auditoria/export",
            get(export_logs).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/auditoria/verificar", get(verify_chain))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn newest_first(mut entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
    entries.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    entries
}

/// GET /auditoria/logs — Search the audit log, newest first.
#[utoipa::path(
    get,
    path = "/auditoria/logs",
    params(
        ("username" = Option<String>, Query, description = "Acting user"),
        ("module" = Option<String>, Query, description = "Module name"),
        ("action" = Option<String>, Query, description = "CREATE, UPDATE, DELETE, LOGIN, LOGOUT or EXPORT"),
        ("outcome" = Option<String>, Query, description = "SUCCESS or ERROR"),
        ("from" = Option<NaiveDate>, Query, description = "First day"),
        ("to" = Option<NaiveDate>, Query, description = "Last day"),
        ("ip" = Option<String>, Query, description = "Client IP substring"),
        ("term" = Option<String>, Query, description = "Free text"),
    ),
    responses(
        (status = 200, description = "Page of audit entries", body = serde_json::Value),
        (status = 400, description = "Unknown module", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub async fn list_logs(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Page<AuditEntry>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let module = filter.module()?;
    let entries = newest_first(state.audit_log.filter(|e| filter.matches(module, e)));
    Ok(Json(page_of(entries, &page)))
}

/// GET /auditoria/logs/{id} — Fetch one entry.
pub async fn get_log(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<AuditEntry>, AppError> {
    caller.require(MODULE, Access::Read)?;
    state
        .audit_log
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("audit entry", id))
}

/// GET /auditoria/errores — Failed commands, newest first.
pub async fn list_errors(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
) -> Result<Json<Page<AuditEntry>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let entries = newest_first(state.audit_log.filter(|e| e.outcome == AuditOutcome::Error));
    Ok(Json(page_of(entries, &page)))
}

/// GET /auditoria/estadisticas — Activity over the last 30 days.
#[utoipa::path(
    get,
    path = "/auditoria/estadisticas",
    responses((status = 200, description = "Audit activity", body = AuditStats)),
    tag = "audit"
)]
pub async fn audit_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<AuditStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.audit_log.list(), Utc::now())))
}

fn stats(entries: &[AuditEntry], now: DateTime<Utc>) -> AuditStats {
    let window_start = now - Duration::days(STATS_DAYS);
    let day_start = now - Duration::hours(24);

    let mut users = BTreeSet::new();
    let mut s = AuditStats {
        total: 0,
        last_24h: 0,
        distinct_users: 0,
        errors: 0,
        by_module: BTreeMap::new(),
        by_user: BTreeMap::new(),
        by_action: BTreeMap::new(),
        by_hour: BTreeMap::new(),
    };
    for e in entries.iter().filter(|e| e.occurred_at >= window_start) {
        s.total += 1;
        if e.occurred_at >= day_start {
            s.last_24h += 1;
        }
        if e.outcome == AuditOutcome::Error {
            s.errors += 1;
        }
        users.insert(e.username.as_str());
        *s.by_module.entry(e.module.key().to_string()).or_insert(0) += 1;
        *s.by_user.entry(e.username.clone()).or_insert(0) += 1;
        *s.by_action.entry(e.action.as_str().to_string()).or_insert(0) += 1;
        *s.by_hour.entry(e.occurred_at.hour()).or_insert(0) += 1;
    }
    s.distinct_users = users.len();
    s
}

/// GET /auditoria/export — Spreadsheet of the filtered log.
pub async fn export_logs(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<AuditFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let module = filter.module()?;
    let entries = newest_first(state.audit_log.filter(|e| filter.matches(module, e)));

    let mut sheet = Sheet::new("Auditoría", EXPORT_HEADERS);
    for e in entries {
        sheet.push(vec![
            e.id.to_string().into(),
            e.occurred_at.into(),
            e.username.into(),
            e.personnel_document.into(),
            e.action.as_str().into(),
            e.module.key().into(),
            e.entity.into(),
            e.entity_id.map(|id| id.to_string()).into(),
            e.description.into(),
            e.ip_address.into(),
            e.outcome.as_str().into(),
            e.error_message.into(),
        ]);
    }
    sheet.into_response("auditoria.xlsx")
}

/// GET /auditoria/verificar — Recompute the persisted hash chain.
#[utoipa::path(
    get,
    path = "/auditoria/verificar",
    responses(
        (status = 200, description = "Chain verification result", body = ChainIntegrityResult),
        (status = 409, description = "No database configured", body = crate::error::ErrorBody),
    ),
    tag = "audit"
)]
pub async fn verify_chain(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ChainIntegrityResult>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let pool = state.db_pool.as_ref().ok_or_else(|| {
        AppError::Conflict("audit chain verification requires a database".into())
    })?;
    let result = crate::db::audit::verify_chain_integrity(pool, VERIFY_LIMIT)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "audit chain verification failed");
            AppError::Internal("audit chain verification failed".into())
        })?;
    if !result.chain_valid {
        tracing::warn!(
            broken_links = result.broken_links,
            tampered = result.tampered_entries,
            "audit chain integrity violated"
        );
    }
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(username: &str, module: Module, outcome: AuditOutcome, at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            username: username.into(),
            personnel_document: None,
            action: AuditAction::Create,
            module,
            entity: module.entity_name().into(),
            entity_id: None,
            description: format!("Created {}", module.entity_name()),
            previous_values: None,
            new_values: None,
            ip_address: "10.0.0.1".into(),
            user_agent: None,
            session_id: None,
            occurred_at: at,
            outcome,
            error_message: None,
        }
    }

    #[test]
    fn stats_cover_thirty_days() {
        let now = Utc::now();
        let rows = vec![
            entry("ana", Module::Fines, AuditOutcome::Success, now),
            entry("ana", Module::Fines, AuditOutcome::Error, now - Duration::days(2)),
            entry("luis", Module::Levies, AuditOutcome::Success, now - Duration::days(10)),
            entry("old", Module::Levies, AuditOutcome::Success, now - Duration::days(40)),
        ];
        let s = stats(&rows, now);
        assert_eq!(s.total, 3);
        assert_eq!(s.last_24h, 1);
        assert_eq!(s.errors, 1);
        assert_eq!(s.distinct_users, 2);
        assert_eq!(s.by_module["MULTAS"], 2);
        assert_eq!(s.by_user["ana"], 2);
        assert!(!s.by_user.contains_key("old"));
        assert_eq!(s.by_hour.values().sum::<usize>(), 3);
    }

    #[test]
    fn module_filter_accepts_both_spellings() {
        assert_eq!(parse_module("multas"), Some(Module::Fines));
        assert_eq!(parse_module("FINES"), Some(Module::Fines));
        assert_eq!(parse_module("naves"), None);
    }

    #[test]
    fn filter_matches_user_and_outcome() {
        let e = entry("ana", Module::Fines, AuditOutcome::Error, Utc::now());
        let filter = AuditFilter {
            username: Some("ANA".into()),
            outcome: Some(AuditOutcome::Error),
            ..Default::default()
        };
        assert!(filter.matches(Some(Module::Fines), &e));
        assert!(!filter.matches(Some(Module::Levies), &e));
    }
}
