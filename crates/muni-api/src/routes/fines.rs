//! # Fines API
//!
//! - **POST `/multas`** — issue a fine, numbered `MUL-yyyyMM-NNNN`
//! - **GET `/multas`** — list, filtered by taxpayer and status
//! - **GET `/multas/{id}`**, **PUT `/multas/{id}`**
//! - **PUT `/multas/{id}/anular`** — void with a reason
//! - **PUT `/multas/{id}/pagar`** — register a (partial) payment
//! - **GET `/multas/estadisticas`**, **GET `/multas/tipos`**
//! - **POST `/multas/vencidas`** — sweep past-due fines to OVERDUE
//!
//! Lifecycle rules live in [`muni_state::Fine`]; handlers only resolve the
//! record, run the operation under the store's write lock, and persist.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use muni_core::ReferenceKind;
use muni_state::{Fine, FineDraft, FineStatus, InfractionType, Lifecycle, Payable};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created, PaymentAmount, SweepResponse, VoidRequest};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::AppState;

const MODULE: Module = Module::Fines;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to issue or amend a fine.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FineRequest {
    pub taxpayer_id: Uuid,
    #[schema(value_type = String, example = "LATE_PAYMENT")]
    pub infraction: InfractionType,
    pub description: String,
    pub amount: Decimal,
    /// Defaults to now.
    pub infraction_date: Option<DateTime<Utc>>,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
}

impl FineRequest {
    fn into_draft(self, now: DateTime<Utc>) -> FineDraft {
        FineDraft {
            taxpayer_id: self.taxpayer_id,
            infraction: self.infraction,
            description: self.description,
            amount: self.amount,
            infraction_date: self.infraction_date.unwrap_or(now),
            due_date: self.due_date,
            notes: self.notes,
        }
    }
}

/// A fine with its derived amounts and the taxpayer's name.
#[derive(Debug, Serialize)]
pub struct FineView {
    #[serde(flatten)]
    pub fine: Fine,
    pub balance: Decimal,
    pub is_paid: bool,
    pub is_overdue: bool,
    pub days_overdue: i64,
    pub infraction_description: &'static str,
    pub taxpayer_name: String,
}

impl FineView {
    fn build(state: &AppState, fine: Fine, now: DateTime<Utc>) -> Self {
        Self {
            balance: fine.balance(),
            is_paid: fine.is_fully_paid(),
            is_overdue: fine.is_overdue(now),
            days_overdue: fine.days_overdue(super::today(now)),
            infraction_description: fine.infraction.description(),
            taxpayer_name: super::taxpayer_name(state, fine.taxpayer_id),
            fine,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FineFilter {
    pub taxpayer_id: Option<Uuid>,
    pub status: Option<FineStatus>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FineStats {
    pub total: usize,
    pub pending: usize,
    pub paid: usize,
    pub overdue: usize,
    /// Amount due of fines still PENDING.
    pub pending_amount: Decimal,
    /// Everything collected across all fines.
    pub paid_amount: Decimal,
    /// Outstanding balance of fines that still accept payments.
    pub balance: Decimal,
}

/// One entry of the infraction catalogue.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InfractionEntry {
    pub value: String,
    pub code: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/multas", get(list_fines))
        .route(
            "/multas",
            post(create_fine).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/multas/estadisticas", get(fine_stats))
        .route("/multas/tipos", get(infraction_types))
        .route(
            "/multas/vencidas",
            post(sweep_overdue_fines).layer(layer(MODULE, AuditAction::Update)),
        )
        .route("/multas/{id}", get(get_fine))
        .route(
            "/multas/{id}",
            put(update_fine).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/multas/{id}/anular",
            put(void_fine).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/multas/{id}/pagar",
            put(pay_fine).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /multas — Issue a fine.
#[utoipa::path(
    post,
    path = "/multas",
    request_body = FineRequest,
    responses(
        (status = 201, description = "Fine issued", body = serde_json::Value),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "fines"
)]
pub async fn create_fine(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<FineRequest>, JsonRejection>,
) -> Result<Created<FineView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let now = Utc::now();
    let draft = req.into_draft(now);
    draft.validate()?;
    let number = state
        .allocate_reference(ReferenceKind::Fine, now, |n| {
            state.fines.any(|f| f.number == n)
        })
        .await?;

    let fine = Fine::issue(Uuid::new_v4(), number, draft, &caller.actor(), now)?;
    state.fines.insert(fine.id, fine.clone());
    state.persist(&fine).await?;
    tracing::info!(fine_id = %fine.id, number = %fine.number, amount = %fine.ledger.amount_due, "fine issued");

    Ok(created(fine.id, FineView::build(&state, fine, now)))
}

/// GET /multas — List fines.
#[utoipa::path(
    get,
    path = "/multas",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Owning taxpayer"),
        ("status" = Option<String>, Query, description = "Fine status"),
        ("limit" = Option<usize>, Query, description = "Page size (default 100, max 1000)"),
        ("offset" = Option<usize>, Query, description = "Records to skip"),
    ),
    responses((status = 200, description = "Page of fines", body = serde_json::Value)),
    tag = "fines"
)]
pub async fn list_fines(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<FineFilter>,
) -> Result<Json<Page<FineView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.fines.filter(|f| {
        filter.taxpayer_id.map_or(true, |id| f.taxpayer_id == id)
            && filter.status.map_or(true, |s| f.status == s)
    });
    let now = Utc::now();
    Ok(Json(
        paginate(items, &page).map(|f| FineView::build(&state, f, now)),
    ))
}

/// GET /multas/{id} — Fetch a fine.
#[utoipa::path(
    get,
    path = "/multas/{id}",
    params(("id" = Uuid, Path, description = "Fine ID")),
    responses(
        (status = 200, description = "Fine found", body = serde_json::Value),
        (status = 404, description = "Fine not found", body = crate::error::ErrorBody),
    ),
    tag = "fines"
)]
pub async fn get_fine(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<FineView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let fine = state
        .fines
        .get(&id)
        .ok_or_else(|| AppError::not_found("fine", id))?;
    Ok(Json(FineView::build(&state, fine, Utc::now())))
}

/// PUT /multas/{id} — Amend a fine that still accepts payments.
#[utoipa::path(
    put,
    path = "/multas/{id}",
    params(("id" = Uuid, Path, description = "Fine ID")),
    request_body = FineRequest,
    responses(
        (status = 200, description = "Fine amended", body = serde_json::Value),
        (status = 404, description = "Fine or taxpayer not found", body = crate::error::ErrorBody),
        (status = 409, description = "Fine is not editable", body = crate::error::ErrorBody),
    ),
    tag = "fines"
)]
pub async fn update_fine(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<FineRequest>, JsonRejection>,
) -> Result<Json<FineView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let actor = caller.actor();
    let now = Utc::now();
    let draft = req.into_draft(now);
    let fine = super::apply(&state.fines, "fine", id, |f| f.amend(draft, &actor, now))?;
    state.persist(&fine).await?;
    Ok(Json(FineView::build(&state, fine, now)))
}

/// PUT /multas/{id}/anular — Void a fine.
#[utoipa::path(
    put,
    path = "/multas/{id}/anular",
    params(("id" = Uuid, Path, description = "Fine ID")),
    request_body = VoidRequest,
    responses(
        (status = 200, description = "Fine voided", body = serde_json::Value),
        (status = 404, description = "Fine not found", body = crate::error::ErrorBody),
        (status = 409, description = "Fine already paid or voided", body = crate::error::ErrorBody),
    ),
    tag = "fines"
)]
pub async fn void_fine(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<VoidRequest>, JsonRejection>,
) -> Result<Json<FineView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let now = Utc::now();
    let fine = super::apply(&state.fines, "fine", id, |f| {
        f.void(req.reason.trim(), &actor, now)
    })?;
    state.persist(&fine).await?;
    tracing::info!(fine_id = %id, by = %actor.username, "fine voided");
    Ok(Json(FineView::build(&state, fine, now)))
}

/// PUT /multas/{id}/pagar — Register a payment against a fine.
#[utoipa::path(
    put,
    path = "/multas/{id}/pagar",
    params(("id" = Uuid, Path, description = "Fine ID")),
    request_body = PaymentAmount,
    responses(
        (status = 200, description = "Payment registered", body = serde_json::Value),
        (status = 404, description = "Fine not found", body = crate::error::ErrorBody),
        (status = 409, description = "Fine does not accept payments", body = crate::error::ErrorBody),
        (status = 422, description = "Amount not positive or above the balance", body = crate::error::ErrorBody),
    ),
    tag = "fines"
)]
pub async fn pay_fine(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PaymentAmount>, JsonRejection>,
) -> Result<Json<FineView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let now = Utc::now();
    let fine = super::apply(&state.fines, "fine", id, |f| {
        f.register_payment(req.amount, &actor, now).map(|_| ())
    })?;
    state.persist(&fine).await?;
    tracing::info!(
        fine_id = %id,
        amount = %req.amount,
        balance = %fine.balance(),
        status = %fine.status,
        "fine payment registered"
    );
    Ok(Json(FineView::build(&state, fine, now)))
}

/// GET /multas/estadisticas — Fine counters and amounts.
#[utoipa::path(
    get,
    path = "/multas/estadisticas",
    responses((status = 200, description = "Fine counters", body = FineStats)),
    tag = "fines"
)]
pub async fn fine_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<FineStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.fines.list())))
}

fn stats(fines: &[Fine]) -> FineStats {
    let count = |status: FineStatus| fines.iter().filter(|f| f.status == status).count();
    FineStats {
        total: fines.len(),
        pending: count(FineStatus::Pending),
        paid: count(FineStatus::Paid),
        overdue: count(FineStatus::Overdue),
        pending_amount: fines
            .iter()
            .filter(|f| f.status == FineStatus::Pending)
            .map(|f| f.ledger.amount_due)
            .sum(),
        paid_amount: fines.iter().map(|f| f.ledger.amount_paid).sum(),
        balance: fines
            .iter()
            .filter(|f| f.accepts_payment())
            .map(|f| f.balance())
            .sum(),
    }
}

/// GET /multas/tipos — Infraction catalogue.
pub async fn infraction_types(caller: CallerIdentity) -> Result<Json<Vec<InfractionEntry>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(
        InfractionType::ALL
            .iter()
            .map(|i| InfractionEntry {
                value: i.as_str().to_string(),
                code: i.code(),
                description: i.description().to_string(),
            })
            .collect(),
    ))
}

/// POST /multas/vencidas — Move past-due fines to OVERDUE.
#[utoipa::path(
    post,
    path = "/multas/vencidas",
    responses((status = 200, description = "Fines moved to OVERDUE", body = SweepResponse)),
    tag = "fines"
)]
pub async fn sweep_overdue_fines(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<SweepResponse>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let updated = crate::sweep::sweep_fines(&state, Utc::now()).await?;
    Ok(Json(SweepResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use muni_core::Actor;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn fine(amount: &str) -> Fine {
        let now = Utc::now();
        Fine::issue(
            Uuid::new_v4(),
            "MUL-202503-0001".into(),
            FineDraft {
                taxpayer_id: Uuid::new_v4(),
                infraction: InfractionType::ALL[0],
                description: "Sin licencia".into(),
                amount: d(amount),
                infraction_date: now,
                due_date: now + Duration::days(30),
                notes: None,
            },
            &Actor::new("inspector"),
            now,
        )
        .unwrap()
    }

    #[test]
    fn stats_split_amounts() {
        let actor = Actor::new("cajero");
        let now = Utc::now();
        let pending = fine("100.00");
        let mut partial = fine("50.00");
        partial.register_payment(d("20.00"), &actor, now).unwrap();
        let mut paid = fine("30.00");
        paid.register_payment(d("30.00"), &actor, now).unwrap();

        let s = stats(&[pending, partial, paid]);
        assert_eq!(s.total, 3);
        assert_eq!(s.pending, 1);
        assert_eq!(s.paid, 1);
        assert_eq!(s.pending_amount, d("100.00"));
        assert_eq!(s.paid_amount, d("50.00"));
        assert_eq!(s.balance, d("130.00"));
    }

    #[test]
    fn view_reports_balance_and_flags() {
        let state = AppState::new();
        let f = fine("80.00");
        let view = FineView::build(&state, f, Utc::now());
        assert_eq!(view.balance, d("80.00"));
        assert!(!view.is_paid);
        assert!(!view.is_overdue);
        assert_eq!(view.days_overdue, 0);
        assert_eq!(view.taxpayer_name, "");
    }
}
