//! # Payments API
//!
//! Money received from taxpayers, under `/pagos`. A payment moves
//! `PENDING → PROCESSED → CONFIRMED`; rejections, voids and refunds branch
//! off per [`muni_state::Payment`]. Bank references are unique among
//! payments that are not voided.

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use muni_state::{Lifecycle, Payment, PaymentDraft, PaymentMethod, PaymentStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::export::Sheet;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::AppState;

const MODULE: Module = Module::Payments;

/// Number of payments returned by `/pagos/recientes`.
const RECENT: usize = 10;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Contribuyente",
    "RIF",
    "Concepto",
    "Monto",
    "Método Pago",
    "Estado",
    "Referencia",
    "Fecha Pago",
    "Usuario Registro",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to record or amend a payment.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentRequest {
    pub taxpayer_id: Uuid,
    pub declaration_id: Option<Uuid>,
    pub fine_id: Option<Uuid>,
    pub amount: Decimal,
    #[schema(value_type = String, example = "CASH")]
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// Defaults to the recording instant.
    pub paid_at: Option<DateTime<Utc>>,
    pub concept: String,
    pub receipt_path: Option<String>,
}

impl From<PaymentRequest> for PaymentDraft {
    fn from(req: PaymentRequest) -> Self {
        Self {
            taxpayer_id: req.taxpayer_id,
            declaration_id: req.declaration_id,
            fine_id: req.fine_id,
            amount: req.amount,
            method: req.method,
            reference: req.reference,
            paid_at: req.paid_at,
            concept: req.concept,
            receipt_path: req.receipt_path,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentView {
    #[serde(flatten)]
    pub payment: Payment,
    pub taxpayer_name: String,
}

impl PaymentView {
    fn build(state: &AppState, payment: Payment) -> Self {
        Self {
            taxpayer_name: super::taxpayer_name(state, payment.taxpayer_id),
            payment,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentFilter {
    pub taxpayer_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    /// Substring of the concept.
    pub concept: Option<String>,
    /// Only payments made today.
    #[serde(default)]
    pub today: bool,
}

impl PaymentFilter {
    fn matches(&self, p: &Payment, now: DateTime<Utc>) -> bool {
        self.taxpayer_id.map_or(true, |id| p.taxpayer_id == id)
            && self.status.map_or(true, |s| p.status == s)
            && super::matches_term(self.concept.as_deref(), &[p.concept.as_str()])
            && (!self.today || p.paid_at.date_naive() == super::today(now))
    }
}

/// Confirmed total of one taxpayer.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaxpayerTotal {
    pub taxpayer_id: Uuid,
    pub total: Decimal,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pagos", get(list_payments))
        .route(
            "/pagos",
            post(create_payment).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/pagos/recientes", get(recent_payments))
        .route(
            "/pagos/exportar",
            get(export_payments).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/pagos/contribuyente/{id}/total", get(taxpayer_total))
        .route("/pagos/{id}", get(get_payment))
        .route(
            "/pagos/{id}",
            put(update_payment).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/pagos/{id}/procesar",
            put(process_payment).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/pagos/{id}/confirmar",
            put(confirm_payment).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/pagos/{id}/anular",
            put(void_payment).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/pagos/{id}/rechazar",
            put(reject_payment).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/pagos/{id}/reembolsar",
            put(refund_payment).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Check the owner, linked records and reference uniqueness of a draft.
fn check_draft(state: &AppState, draft: &PaymentDraft, except: Option<Uuid>) -> Result<(), AppError> {
    draft.validate()?;
    super::require_taxpayer(state, draft.taxpayer_id)?;
    if let Some(id) = draft.declaration_id {
        if !state.declarations.contains(&id) {
            return Err(AppError::not_found("declaration", id));
        }
    }
    if let Some(id) = draft.fine_id {
        if !state.fines.contains(&id) {
            return Err(AppError::not_found("fine", id));
        }
    }
    if let Some(reference) = draft.normalized_reference() {
        let taken = state.payments.any(|p| {
            Some(p.id) != except
                && p.holds_reference()
                && p.reference.as_deref() == Some(reference.as_str())
        });
        if taken {
            return Err(AppError::Conflict(format!(
                "payment reference {reference} is already registered"
            )));
        }
    }
    Ok(())
}

/// POST /pagos — Record a payment.
#[utoipa::path(
    post,
    path = "/pagos",
    request_body = PaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = serde_json::Value),
        (status = 404, description = "Taxpayer, declaration or fine not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate reference", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Created<PaymentView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let draft = PaymentDraft::from(extract_json(body)?);
    check_draft(&state, &draft, None)?;

    let payment = Payment::record(Uuid::new_v4(), draft, &caller.actor(), Utc::now())?;
    state.payments.insert(payment.id, payment.clone());
    state.persist(&payment).await?;
    tracing::info!(
        payment_id = %payment.id,
        taxpayer_id = %payment.taxpayer_id,
        amount = %payment.amount,
        method = %payment.method,
        "payment recorded"
    );

    Ok(created(payment.id, PaymentView::build(&state, payment)))
}

/// GET /pagos — List payments.
#[utoipa::path(
    get,
    path = "/pagos",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Paying taxpayer"),
        ("status" = Option<String>, Query, description = "Payment status"),
        ("concept" = Option<String>, Query, description = "Concept substring"),
        ("today" = Option<bool>, Query, description = "Only payments made today"),
    ),
    responses((status = 200, description = "Page of payments", body = serde_json::Value)),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<PaymentFilter>,
) -> Result<Json<Page<PaymentView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let now = Utc::now();
    let items = state.payments.filter(|p| filter.matches(p, now));
    Ok(Json(
        paginate(items, &page).map(|p| PaymentView::build(&state, p)),
    ))
}

/// GET /pagos/recientes — The latest payments recorded.
pub async fn recent_payments(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<PaymentView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let page = paginate(
        state.payments.list(),
        &PageParams {
            limit: Some(RECENT),
            offset: None,
        },
    );
    Ok(Json(
        page.items
            .into_iter()
            .map(|p| PaymentView::build(&state, p))
            .collect(),
    ))
}

/// GET /pagos/{id} — Fetch a payment.
#[utoipa::path(
    get,
    path = "/pagos/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment found", body = serde_json::Value),
        (status = 404, description = "Payment not found", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let payment = state
        .payments
        .get(&id)
        .ok_or_else(|| AppError::not_found("payment", id))?;
    Ok(Json(PaymentView::build(&state, payment)))
}

/// PUT /pagos/{id} — Amend a payment that is not yet confirmed.
#[utoipa::path(
    put,
    path = "/pagos/{id}",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body = PaymentRequest,
    responses(
        (status = 200, description = "Payment amended", body = serde_json::Value),
        (status = 404, description = "Payment not found", body = crate::error::ErrorBody),
        (status = 409, description = "Payment confirmed or reference taken", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn update_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let draft = PaymentDraft::from(extract_json(body)?);
    if !state.payments.contains(&id) {
        return Err(AppError::not_found("payment", id));
    }
    check_draft(&state, &draft, Some(id))?;

    let actor = caller.actor();
    let payment = super::apply(&state.payments, "payment", id, |p| {
        p.amend(draft, &actor, Utc::now())
    })?;
    state.persist(&payment).await?;
    Ok(Json(PaymentView::build(&state, payment)))
}

/// Run one status transition and persist the result.
async fn transition(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    op: impl FnOnce(&mut Payment, &muni_core::Actor, DateTime<Utc>) -> Result<(), muni_state::LedgerError>,
) -> Result<Json<PaymentView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let actor = caller.actor();
    let payment = super::apply(&state.payments, "payment", id, |p| op(p, &actor, Utc::now()))?;
    state.persist(&payment).await?;
    tracing::info!(payment_id = %id, status = %payment.status, by = %actor.username, "payment status changed");
    Ok(Json(PaymentView::build(state, payment)))
}

/// PUT /pagos/{id}/procesar — `PENDING → PROCESSED`.
#[utoipa::path(
    put,
    path = "/pagos/{id}/procesar",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment processed", body = serde_json::Value),
        (status = 409, description = "Payment is not pending", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn process_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    transition(&state, &caller, id, |p, actor, now| p.process(actor, now)).await
}

/// PUT /pagos/{id}/confirmar — `PROCESSED → CONFIRMED`.
#[utoipa::path(
    put,
    path = "/pagos/{id}/confirmar",
    params(("id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment confirmed", body = serde_json::Value),
        (status = 409, description = "Payment is not processed", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    transition(&state, &caller, id, |p, actor, now| p.confirm(actor, now)).await
}

/// PUT /pagos/{id}/anular — Void a payment that is not confirmed.
///
/// The body `{"reason": "..."}` is optional.
#[utoipa::path(
    put,
    path = "/pagos/{id}/anular",
    params(("id" = Uuid, Path, description = "Payment ID")),
    request_body(content = serde_json::Value, description = "Optional `{\"reason\": \"...\"}`"),
    responses(
        (status = 200, description = "Payment voided", body = serde_json::Value),
        (status = 409, description = "Payment confirmed or already voided", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn void_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<PaymentView>, AppError> {
    let reason = super::optional_reason(&body)?;
    transition(&state, &caller, id, |p, actor, now| p.void(&reason, actor, now)).await
}

/// PUT /pagos/{id}/rechazar — Reject a pending or processed payment.
pub async fn reject_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    transition(&state, &caller, id, |p, actor, now| p.reject(actor, now)).await
}

/// PUT /pagos/{id}/reembolsar — Refund a confirmed payment.
pub async fn refund_payment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    transition(&state, &caller, id, |p, actor, now| p.refund(actor, now)).await
}

/// GET /pagos/contribuyente/{id}/total — Sum of a taxpayer's confirmed payments.
#[utoipa::path(
    get,
    path = "/pagos/contribuyente/{id}/total",
    params(("id" = Uuid, Path, description = "Taxpayer ID")),
    responses(
        (status = 200, description = "Confirmed total", body = TaxpayerTotal),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
    ),
    tag = "payments"
)]
pub async fn taxpayer_total(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TaxpayerTotal>, AppError> {
    caller.require(MODULE, Access::Read)?;
    super::require_taxpayer(&state, id)?;
    Ok(Json(TaxpayerTotal {
        taxpayer_id: id,
        total: confirmed_total(&state.payments.list(), id),
    }))
}

fn confirmed_total(payments: &[Payment], taxpayer_id: Uuid) -> Decimal {
    payments
        .iter()
        .filter(|p| p.taxpayer_id == taxpayer_id && p.status == PaymentStatus::Confirmed)
        .map(|p| p.amount)
        .sum()
}

/// GET /pagos/exportar — Spreadsheet of the filtered payments.
pub async fn export_payments(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<PaymentFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let now = Utc::now();
    let mut payments = state.payments.filter(|p| filter.matches(p, now));
    payments.sort_by(|a, b| b.paid_at.cmp(&a.paid_at));

    let mut sheet = Sheet::new("Pagos", EXPORT_HEADERS);
    for p in payments {
        let taxpayer = state.taxpayers.get(&p.taxpayer_id);
        sheet.push(vec![
            p.id.to_string().into(),
            taxpayer.as_ref().map(|t| t.display_name()).into(),
            taxpayer.map(|t| t.tax_id).into(),
            p.concept.into(),
            p.amount.into(),
            p.method.as_str().into(),
            p.status.as_str().into(),
            p.reference.into(),
            p.paid_at.into(),
            p.stamp.created_by.into(),
        ]);
    }
    sheet.into_response("pagos.xlsx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use muni_core::Actor;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn payment(taxpayer_id: Uuid, amount: &str, reference: Option<&str>) -> Payment {
        Payment::record(
            Uuid::new_v4(),
            PaymentDraft {
                taxpayer_id,
                declaration_id: None,
                fine_id: None,
                amount: d(amount),
                method: PaymentMethod::Transfer,
                reference: reference.map(str::to_string),
                paid_at: None,
                concept: "Pago de tasa de aseo".into(),
                receipt_path: None,
            },
            &Actor::new("cajero"),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn confirmed_total_ignores_other_statuses() {
        let actor = Actor::new("cajero");
        let now = Utc::now();
        let owner = Uuid::new_v4();
        let mut confirmed = payment(owner, "25.00", None);
        confirmed.process(&actor, now).unwrap();
        confirmed.confirm(&actor, now).unwrap();
        let pending = payment(owner, "99.00", None);
        let mut other = payment(Uuid::new_v4(), "10.00", None);
        other.process(&actor, now).unwrap();
        other.confirm(&actor, now).unwrap();

        assert_eq!(confirmed_total(&[confirmed, pending, other], owner), d("25.00"));
    }

    #[test]
    fn duplicate_reference_is_rejected() {
        let state = AppState::new();
        let now = Utc::now();
        let taxpayer = crate::state::Taxpayer {
            id: Uuid::new_v4(),
            tax_id: "J-1".into(),
            business_name: None,
            first_name: "Ana".into(),
            last_name: "Pérez".into(),
            address: "Centro".into(),
            phone: None,
            email: "ana@example.com".into(),
            kind: crate::state::TaxpayerKind::NaturalPerson,
            legal_representative: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.taxpayers.insert(taxpayer.id, taxpayer.clone());
        let existing = payment(taxpayer.id, "10.00", Some("REF-1"));
        state.payments.insert(existing.id, existing.clone());

        let draft = PaymentDraft {
            taxpayer_id: taxpayer.id,
            declaration_id: None,
            fine_id: None,
            amount: d("5.00"),
            method: PaymentMethod::Cash,
            reference: Some(" REF-1 ".into()),
            paid_at: None,
            concept: "Otro".into(),
            receipt_path: None,
        };
        assert!(matches!(check_draft(&state, &draft, None), Err(AppError::Conflict(_))));
        assert!(check_draft(&state, &draft, Some(existing.id)).is_ok());
    }

    #[test]
    fn today_filter_uses_paid_date() {
        let p = payment(Uuid::new_v4(), "1.00", None);
        let filter = PaymentFilter {
            today: true,
            ..Default::default()
        };
        assert!(filter.matches(&p, Utc::now()));
        assert!(!filter.matches(&p, Utc::now() + chrono::Duration::days(2)));
    }
}
