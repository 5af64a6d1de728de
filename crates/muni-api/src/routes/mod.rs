//! # API Route Modules
//!
//! One module per functional area. Each exposes `router()` returning a
//! `Router<AppState>` with full paths; [`crate::app`] merges them.
//!
//! Handlers follow one shape: extract the [`CallerIdentity`], check the
//! module authority, validate, mutate through the store (`try_update` for
//! read-validate-write), then write the record through to the database.
//! Command routes carry `audit::layer(module, action)`.
//!
//! [`CallerIdentity`]: crate::auth::CallerIdentity

pub mod audit;
pub mod dashboard;
pub mod declarations;
pub mod fines;
pub mod levies;
pub mod payments;
pub mod personnel;
pub mod roles;
pub mod services;
pub mod taxes;
pub mod taxpayers;
pub mod transactions;
pub mod vouchers;
pub mod withholdings;

use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use muni_state::LedgerError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::AuditSubject;
use crate::error::AppError;
use crate::state::{AppState, Store, Taxpayer};

/// Response of a create command: 201, the new record, and its id for the
/// audit entry.
pub type Created<T> = (StatusCode, Extension<AuditSubject>, Json<T>);

pub(crate) fn created<T>(id: Uuid, body: T) -> Created<T> {
    (StatusCode::CREATED, Extension(AuditSubject(id)), Json(body))
}

/// Run a lifecycle operation on a stored record under its write lock.
///
/// On error the record is left exactly as it was. Returns the updated record.
pub(crate) fn apply<T, F>(store: &Store<T>, entity: &str, id: Uuid, op: F) -> Result<T, AppError>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(&mut T) -> Result<(), LedgerError>,
{
    store
        .try_update(&id, |record| {
            op(record)?;
            Ok::<T, LedgerError>(record.clone())
        })
        .ok_or_else(|| AppError::not_found(entity, id))?
        .map_err(AppError::from)
}

/// Look up the owning taxpayer, 404 if absent.
pub(crate) fn require_taxpayer(state: &AppState, id: Uuid) -> Result<Taxpayer, AppError> {
    state
        .taxpayers
        .get(&id)
        .ok_or_else(|| AppError::not_found("taxpayer", id))
}

/// Display name of a taxpayer, empty when the record is gone.
pub(crate) fn taxpayer_name(state: &AppState, id: Uuid) -> String {
    state
        .taxpayers
        .get(&id)
        .map(|t| t.display_name())
        .unwrap_or_default()
}

/// Case-insensitive substring match over any of `fields`. `None` matches all.
pub(crate) fn matches_term(term: Option<&str>, fields: &[&str]) -> bool {
    match term.map(str::trim).filter(|t| !t.is_empty()) {
        None => true,
        Some(term) => {
            let term = term.to_lowercase();
            fields.iter().any(|f| f.to_lowercase().contains(&term))
        }
    }
}

/// Whether `at` falls in the inclusive `[from, to]` date range.
pub(crate) fn within_dates(at: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.map_or(true, |from| at >= from) && to.map_or(true, |to| at <= to)
}

pub(crate) fn today(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}

/// Body of void commands.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VoidRequest {
    pub reason: String,
}

/// Reason of a void command whose body may be empty.
pub(crate) fn optional_reason(body: &[u8]) -> Result<String, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(String::new());
    }
    #[derive(Deserialize)]
    struct Reason {
        #[serde(default)]
        reason: Option<String>,
    }
    let parsed: Reason = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid JSON body: {e}")))?;
    Ok(parsed.reason.unwrap_or_default().trim().to_string())
}

/// Body of explicit status changes.
#[derive(Debug, Deserialize)]
pub struct StatusRequest<S> {
    pub status: S,
}

/// Body of payment registrations.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentAmount {
    pub amount: rust_decimal::Decimal,
}

/// Result of an overdue sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    pub updated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_matching_is_case_insensitive() {
        assert!(matches_term(Some("ana"), &["J-1", "ANA PÉREZ"]));
        assert!(matches_term(None, &["x"]));
        assert!(matches_term(Some("  "), &["x"]));
        assert!(!matches_term(Some("luis"), &["ana"]));
    }

    #[test]
    fn date_range_is_inclusive() {
        let d = |s: &str| s.parse::<NaiveDate>().unwrap();
        assert!(within_dates(d("2025-03-01"), Some(d("2025-03-01")), Some(d("2025-03-31"))));
        assert!(!within_dates(d("2025-04-01"), None, Some(d("2025-03-31"))));
        assert!(within_dates(d("2025-04-01"), None, None));
    }

    #[test]
    fn optional_reason_accepts_empty_body() {
        assert_eq!(optional_reason(b"").unwrap(), "");
        assert_eq!(optional_reason(b"{}").unwrap(), "");
        assert_eq!(optional_reason(br#"{"reason":" duplicado "}"#).unwrap(), "duplicado");
        assert!(matches!(optional_reason(b"{oops"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn apply_reports_missing_record() {
        let store: Store<crate::state::Tax> = Store::new();
        let err = apply(&store, "tax", Uuid::nil(), |_| Ok(())).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
