//! # Levies API
//!
//! Recurring municipal charges under `/tasas`. Numbers follow
//! `TAS-yyyyMM-NNNN`. A levy can be amended only before any payment;
//! `PAID` and `VOIDED` are final for explicit status changes.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use muni_core::ReferenceKind;
use muni_state::{BillingPeriod, Levy, LevyDraft, LevyStatus, LevyType, Payable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created, PaymentAmount, StatusRequest, SweepResponse};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::AppState;

const MODULE: Module = Module::Levies;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LevyRequest {
    pub taxpayer_id: Uuid,
    #[schema(value_type = String, example = "WASTE_COLLECTION")]
    pub levy_type: LevyType,
    pub description: String,
    pub amount: Decimal,
    #[schema(value_type = String, example = "MONTHLY")]
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDate,
    /// Defaults to one billing period after the start date.
    pub due_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub zone: Option<String>,
    pub property_area: Option<Decimal>,
    pub cadastral_value: Option<Decimal>,
    pub notes: Option<String>,
}

impl From<LevyRequest> for LevyDraft {
    fn from(req: LevyRequest) -> Self {
        Self {
            taxpayer_id: req.taxpayer_id,
            levy_type: req.levy_type,
            description: req.description,
            amount: req.amount,
            billing_period: req.billing_period,
            start_date: req.start_date,
            due_date: req.due_date,
            address: req.address,
            zone: req.zone,
            property_area: req.property_area,
            cadastral_value: req.cadastral_value,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LevyView {
    #[serde(flatten)]
    pub levy: Levy,
    pub balance: Decimal,
    pub is_paid: bool,
    pub taxpayer_name: String,
}

impl LevyView {
    fn build(state: &AppState, levy: Levy) -> Self {
        Self {
            balance: levy.balance(),
            is_paid: levy.is_fully_paid(),
            taxpayer_name: super::taxpayer_name(state, levy.taxpayer_id),
            levy,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LevyFilter {
    pub taxpayer_id: Option<Uuid>,
    pub levy_type: Option<LevyType>,
    pub status: Option<LevyStatus>,
    pub zone: Option<String>,
}

impl LevyFilter {
    fn matches(&self, l: &Levy) -> bool {
        self.taxpayer_id.map_or(true, |id| l.taxpayer_id == id)
            && self.levy_type.map_or(true, |t| l.levy_type == t)
            && self.status.map_or(true, |s| l.status == s)
            && match self.zone.as_deref() {
                None => true,
                Some(zone) => l
                    .zone
                    .as_deref()
                    .is_some_and(|z| z.eq_ignore_ascii_case(zone.trim())),
            }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LevyStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub collected: Decimal,
    /// Outstanding balance of levies that still accept payments.
    pub pending: Decimal,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasas", get(list_levies))
        .route(
            "/tasas",
            post(create_levy).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/tasas/estadisticas", get(levy_stats))
        .route(
            "/tasas/vencidas",
            post(sweep_overdue_levies).layer(layer(MODULE, AuditAction::Update)),
        )
        .route("/tasas/{id}", get(get_levy))
        .route(
            "/tasas/{id}",
            put(update_levy).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tasas/{id}",
            delete(delete_levy).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/tasas/{id}/pago",
            post(pay_levy).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tasas/{id}/estado",
            put(change_levy_status).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /tasas — Assess a levy.
#[utoipa::path(
    post,
    path = "/tasas",
    request_body = LevyRequest,
    responses(
        (status = 201, description = "Levy assessed", body = serde_json::Value),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "levies"
)]
pub async fn create_levy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<LevyRequest>, JsonRejection>,
) -> Result<Created<LevyView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let draft = LevyDraft::from(req);
    draft.validate()?;
    let now = Utc::now();
    let number = state
        .allocate_reference(ReferenceKind::Levy, now, |n| {
            state.levies.any(|l| l.number == n)
        })
        .await?;

    let levy = Levy::assess(Uuid::new_v4(), number, draft, &caller.actor(), now)?;
    state.levies.insert(levy.id, levy.clone());
    state.persist(&levy).await?;
    tracing::info!(levy_id = %levy.id, number = %levy.number, "levy assessed");

    Ok(created(levy.id, LevyView::build(&state, levy)))
}

/// GET /tasas — List levies.
#[utoipa::path(
    get,
    path = "/tasas",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Owning taxpayer"),
        ("levy_type" = Option<String>, Query, description = "Levy type"),
        ("status" = Option<String>, Query, description = "Levy status"),
        ("zone" = Option<String>, Query, description = "Zone, case-insensitive"),
    ),
    responses((status = 200, description = "Page of levies", body = serde_json::Value)),
    tag = "levies"
)]
pub async fn list_levies(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<LevyFilter>,
) -> Result<Json<Page<LevyView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.levies.filter(|l| filter.matches(l));
    Ok(Json(
        paginate(items, &page).map(|l| LevyView::build(&state, l)),
    ))
}

/// GET /tasas/{id} — Fetch a levy.
pub async fn get_levy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<LevyView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let levy = state
        .levies
        .get(&id)
        .ok_or_else(|| AppError::not_found("levy", id))?;
    Ok(Json(LevyView::build(&state, levy)))
}

/// PUT /tasas/{id} — Amend a levy nothing has been paid on.
#[utoipa::path(
    put,
    path = "/tasas/{id}",
    params(("id" = Uuid, Path, description = "Levy ID")),
    request_body = LevyRequest,
    responses(
        (status = 200, description = "Levy amended", body = serde_json::Value),
        (status = 404, description = "Levy or taxpayer not found", body = crate::error::ErrorBody),
        (status = 409, description = "Levy is final or has payments", body = crate::error::ErrorBody),
    ),
    tag = "levies"
)]
pub async fn update_levy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<LevyRequest>, JsonRejection>,
) -> Result<Json<LevyView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let actor = caller.actor();
    let draft = LevyDraft::from(req);
    let levy = super::apply(&state.levies, "levy", id, |l| {
        l.amend(draft, &actor, Utc::now())
    })?;
    state.persist(&levy).await?;
    Ok(Json(LevyView::build(&state, levy)))
}

/// DELETE /tasas/{id} — Delete an unpaid levy.
#[utoipa::path(
    delete,
    path = "/tasas/{id}",
    params(("id" = Uuid, Path, description = "Levy ID")),
    responses(
        (status = 204, description = "Levy deleted"),
        (status = 404, description = "Levy not found", body = crate::error::ErrorBody),
        (status = 409, description = "Levy paid or partially collected", body = crate::error::ErrorBody),
    ),
    tag = "levies"
)]
pub async fn delete_levy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let levy = state
        .levies
        .get(&id)
        .ok_or_else(|| AppError::not_found("levy", id))?;
    if !levy.is_deletable() {
        return Err(AppError::Conflict(format!(
            "levy {} in status {} with {} collected cannot be deleted",
            levy.number, levy.status, levy.ledger.amount_paid
        )));
    }
    state.levies.remove(&id);
    state.forget::<Levy>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tasas/{id}/pago — Register a payment against a levy.
#[utoipa::path(
    post,
    path = "/tasas/{id}/pago",
    params(("id" = Uuid, Path, description = "Levy ID")),
    request_body = PaymentAmount,
    responses(
        (status = 200, description = "Payment registered", body = serde_json::Value),
        (status = 404, description = "Levy not found", body = crate::error::ErrorBody),
        (status = 409, description = "Levy does not accept payments", body = crate::error::ErrorBody),
        (status = 422, description = "Amount not positive or above the balance", body = crate::error::ErrorBody),
    ),
    tag = "levies"
)]
pub async fn pay_levy(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PaymentAmount>, JsonRejection>,
) -> Result<Json<LevyView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let levy = super::apply(&state.levies, "levy", id, |l| {
        l.register_payment(req.amount, &actor, Utc::now()).map(|_| ())
    })?;
    state.persist(&levy).await?;
    tracing::info!(levy_id = %id, amount = %req.amount, status = %levy.status, "levy payment registered");
    Ok(Json(LevyView::build(&state, levy)))
}

/// PUT /tasas/{id}/estado — Change the status explicitly.
#[utoipa::path(
    put,
    path = "/tasas/{id}/estado",
    params(("id" = Uuid, Path, description = "Levy ID")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Status changed", body = serde_json::Value),
        (status = 409, description = "Levy is final or already in that status", body = crate::error::ErrorBody),
    ),
    tag = "levies"
)]
pub async fn change_levy_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusRequest<LevyStatus>>, JsonRejection>,
) -> Result<Json<LevyView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let levy = super::apply(&state.levies, "levy", id, |l| {
        l.change_status(req.status, &actor, Utc::now())
    })?;
    state.persist(&levy).await?;
    Ok(Json(LevyView::build(&state, levy)))
}

/// GET /tasas/estadisticas — Levy counters and amounts.
#[utoipa::path(
    get,
    path = "/tasas/estadisticas",
    responses((status = 200, description = "Levy counters", body = LevyStats)),
    tag = "levies"
)]
pub async fn levy_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<LevyStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.levies.list())))
}

fn stats(levies: &[Levy]) -> LevyStats {
    let mut by_status = BTreeMap::new();
    let mut by_type = BTreeMap::new();
    for l in levies {
        *by_status.entry(l.status.as_str().to_string()).or_insert(0) += 1;
        *by_type.entry(l.levy_type.as_str().to_string()).or_insert(0) += 1;
    }
    LevyStats {
        total: levies.len(),
        by_status,
        by_type,
        collected: levies.iter().map(|l| l.ledger.amount_paid).sum(),
        pending: levies
            .iter()
            .filter(|l| l.accepts_payment())
            .map(|l| l.balance())
            .sum(),
    }
}

/// POST /tasas/vencidas — Move past-due levies to OVERDUE.
pub async fn sweep_overdue_levies(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<SweepResponse>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let updated = crate::sweep::sweep_levies(&state, Utc::now()).await?;
    Ok(Json(SweepResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use muni_core::Actor;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn levy(zone: Option<&str>, amount: &str) -> Levy {
        Levy::assess(
            Uuid::new_v4(),
            "TAS-202503-0001".into(),
            LevyDraft {
                taxpayer_id: Uuid::new_v4(),
                levy_type: LevyType::ALL[0],
                description: "Aseo urbano".into(),
                amount: d(amount),
                billing_period: BillingPeriod::Monthly,
                start_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                due_date: None,
                address: None,
                zone: zone.map(str::to_string),
                property_area: None,
                cadastral_value: None,
                notes: None,
            },
            &Actor::new("recaudador"),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn zone_filter_is_case_insensitive() {
        let l = levy(Some("Centro"), "10.00");
        let filter = LevyFilter {
            zone: Some("centro".into()),
            ..Default::default()
        };
        assert!(filter.matches(&l));
        assert!(!filter.matches(&levy(None, "10.00")));
    }

    #[test]
    fn stats_collected_and_pending() {
        let actor = Actor::new("cajero");
        let mut partial = levy(None, "40.00");
        partial.register_payment(d("15.00"), &actor, Utc::now()).unwrap();
        let untouched = levy(None, "25.00");

        let s = stats(&[partial, untouched]);
        assert_eq!(s.total, 2);
        assert_eq!(s.collected, d("15.00"));
        assert_eq!(s.pending, d("50.00"));
        assert_eq!(s.by_status.get("ACTIVE"), Some(&1));
        assert_eq!(s.by_status.get("PARTIALLY_PAID"), Some(&1));
    }
}
