//! # Tax Declarations API
//!
//! Self-assessments of a taxpayer for one tax and period, under
//! `/tributario/declaraciones`. A declaration is editable while PENDING;
//! registering its payment records a PENDING [`Payment`] and marks the
//! declaration PAID.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use muni_core::{money, validation};
use muni_state::{Payment, PaymentDraft, PaymentMethod};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created, StatusRequest};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::export::Sheet;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::{AppState, Declaration, DeclarationStatus};

const MODULE: Module = Module::Declarations;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Contribuyente",
    "RIF",
    "Impuesto",
    "Período",
    "Base Imponible",
    "Monto",
    "Estado",
    "Fecha Creación",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to file or amend a declaration.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeclarationRequest {
    pub taxpayer_id: Uuid,
    pub tax_id: Uuid,
    /// Fiscal period, e.g. `2025-03`.
    pub period: String,
    pub taxable_base: Decimal,
    pub amount: Decimal,
}

impl DeclarationRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("period", &self.period, 20)?;
        money::require_non_negative("taxable_base", self.taxable_base)?;
        money::check_precision("taxable_base", self.taxable_base, 13, 2)?;
        money::require_non_negative("amount", self.amount)?;
        money::check_precision("amount", self.amount, 13, 2)?;
        Ok(())
    }
}

/// Payment of a declaration.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeclarationPaymentRequest {
    pub amount: Decimal,
    #[schema(value_type = String, example = "TRANSFER")]
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

/// Outcome of a declaration payment: the declaration and the payment it created.
#[derive(Debug, Serialize)]
pub struct DeclarationPaymentResponse {
    pub declaration: Declaration,
    pub payment: Payment,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclarationFilter {
    pub taxpayer_id: Option<Uuid>,
    pub tax_id: Option<Uuid>,
    pub status: Option<DeclarationStatus>,
    pub period: Option<String>,
}

impl DeclarationFilter {
    fn matches(&self, d: &Declaration) -> bool {
        self.taxpayer_id.map_or(true, |id| d.taxpayer_id == id)
            && self.tax_id.map_or(true, |id| d.tax_id == id)
            && self.status.map_or(true, |s| d.status == s)
            && super::matches_term(self.period.as_deref(), &[d.period.as_str()])
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tributario/declaraciones", get(list_declarations))
        .route(
            "/tributario/declaraciones",
            post(create_declaration).layer(layer(MODULE, AuditAction::Create)),
        )
        .route(
            "/tributario/declaraciones/export",
            get(export_declarations).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/tributario/declaraciones/{id}", get(get_declaration))
        .route(
            "/tributario/declaraciones/{id}",
            put(update_declaration).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/declaraciones/{id}",
            delete(delete_declaration).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/tributario/declaraciones/{id}/estado",
            post(change_declaration_status).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/declaraciones/{id}/pago",
            post(pay_declaration).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn require_references(state: &AppState, req: &DeclarationRequest) -> Result<(), AppError> {
    super::require_taxpayer(state, req.taxpayer_id)?;
    if !state.taxes.contains(&req.tax_id) {
        return Err(AppError::not_found("tax", req.tax_id));
    }
    Ok(())
}

fn require_pending(d: &Declaration, operation: &str) -> Result<(), AppError> {
    if d.status != DeclarationStatus::Pending {
        return Err(AppError::Conflict(format!(
            "cannot {operation} a declaration in status {}",
            d.status.as_str()
        )));
    }
    Ok(())
}

/// POST /tributario/declaraciones — File a declaration.
#[utoipa::path(
    post,
    path = "/tributario/declaraciones",
    request_body = DeclarationRequest,
    responses(
        (status = 201, description = "Declaration filed", body = Declaration),
        (status = 404, description = "Taxpayer or tax not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn create_declaration(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<DeclarationRequest>, JsonRejection>,
) -> Result<Created<Declaration>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    require_references(&state, &req)?;

    let now = Utc::now();
    let declaration = Declaration {
        id: Uuid::new_v4(),
        taxpayer_id: req.taxpayer_id,
        tax_id: req.tax_id,
        period: req.period.trim().to_string(),
        taxable_base: req.taxable_base,
        amount: req.amount,
        status: DeclarationStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    state.declarations.insert(declaration.id, declaration.clone());
    state.persist(&declaration).await?;

    Ok(created(declaration.id, declaration))
}

/// GET /tributario/declaraciones — List declarations.
#[utoipa::path(
    get,
    path = "/tributario/declaraciones",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Owning taxpayer"),
        ("tax_id" = Option<Uuid>, Query, description = "Declared tax"),
        ("status" = Option<DeclarationStatus>, Query, description = "Declaration status"),
        ("period" = Option<String>, Query, description = "Period substring"),
    ),
    responses((status = 200, description = "Page of declarations", body = serde_json::Value)),
    tag = "declarations"
)]
pub async fn list_declarations(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<DeclarationFilter>,
) -> Result<Json<Page<Declaration>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.declarations.filter(|d| filter.matches(d));
    Ok(Json(paginate(items, &page)))
}

/// GET /tributario/declaraciones/{id} — Fetch a declaration.
#[utoipa::path(
    get,
    path = "/tributario/declaraciones/{id}",
    params(("id" = Uuid, Path, description = "Declaration ID")),
    responses(
        (status = 200, description = "Declaration found", body = Declaration),
        (status = 404, description = "Declaration not found", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn get_declaration(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Declaration>, AppError> {
    caller.require(MODULE, Access::Read)?;
    state
        .declarations
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("declaration", id))
}

/// PUT /tributario/declaraciones/{id} — Amend a pending declaration.
#[utoipa::path(
    put,
    path = "/tributario/declaraciones/{id}",
    params(("id" = Uuid, Path, description = "Declaration ID")),
    request_body = DeclarationRequest,
    responses(
        (status = 200, description = "Declaration amended", body = Declaration),
        (status = 404, description = "Declaration not found", body = crate::error::ErrorBody),
        (status = 409, description = "Declaration is not pending", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn update_declaration(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DeclarationRequest>, JsonRejection>,
) -> Result<Json<Declaration>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    require_references(&state, &req)?;

    let declaration = state
        .declarations
        .try_update(&id, |d| {
            require_pending(d, "amend")?;
            d.taxpayer_id = req.taxpayer_id;
            d.tax_id = req.tax_id;
            d.period = req.period.trim().to_string();
            d.taxable_base = req.taxable_base;
            d.amount = req.amount;
            d.updated_at = Utc::now();
            Ok::<_, AppError>(d.clone())
        })
        .ok_or_else(|| AppError::not_found("declaration", id))??;
    state.persist(&declaration).await?;
    Ok(Json(declaration))
}

/// DELETE /tributario/declaraciones/{id} — Delete a pending, unpaid declaration.
#[utoipa::path(
    delete,
    path = "/tributario/declaraciones/{id}",
    params(("id" = Uuid, Path, description = "Declaration ID")),
    responses(
        (status = 204, description = "Declaration deleted"),
        (status = 404, description = "Declaration not found", body = crate::error::ErrorBody),
        (status = 409, description = "Declaration not pending or referenced by payments", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn delete_declaration(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let declaration = state
        .declarations
        .get(&id)
        .ok_or_else(|| AppError::not_found("declaration", id))?;
    require_pending(&declaration, "delete")?;
    if state.payments.any(|p| p.declaration_id == Some(id)) {
        return Err(AppError::Conflict(format!(
            "declaration {id} is referenced by payments"
        )));
    }
    state.declarations.remove(&id);
    state.forget::<Declaration>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tributario/declaraciones/{id}/estado — Set the status explicitly.
#[utoipa::path(
    post,
    path = "/tributario/declaraciones/{id}/estado",
    params(("id" = Uuid, Path, description = "Declaration ID")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Status changed", body = Declaration),
        (status = 404, description = "Declaration not found", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn change_declaration_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusRequest<DeclarationStatus>>, JsonRejection>,
) -> Result<Json<Declaration>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let declaration = state
        .declarations
        .update(&id, |d| {
            d.status = req.status;
            d.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("declaration", id))?;
    state.persist(&declaration).await?;
    Ok(Json(declaration))
}

/// POST /tributario/declaraciones/{id}/pago — Pay a pending declaration.
#[utoipa::path(
    post,
    path = "/tributario/declaraciones/{id}/pago",
    params(("id" = Uuid, Path, description = "Declaration ID")),
    request_body = DeclarationPaymentRequest,
    responses(
        (status = 200, description = "Payment recorded, declaration paid", body = serde_json::Value),
        (status = 404, description = "Declaration not found", body = crate::error::ErrorBody),
        (status = 409, description = "Declaration is not pending", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid amount", body = crate::error::ErrorBody),
    ),
    tag = "declarations"
)]
pub async fn pay_declaration(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<DeclarationPaymentRequest>, JsonRejection>,
) -> Result<Json<DeclarationPaymentResponse>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    money::require_positive("amount", req.amount)?;

    let actor = caller.actor();
    let now = Utc::now();
    let mut payment = None;
    let declaration = state
        .declarations
        .try_update(&id, |d| {
            require_pending(d, "pay")?;
            let draft = PaymentDraft {
                taxpayer_id: d.taxpayer_id,
                declaration_id: Some(d.id),
                fine_id: None,
                amount: req.amount,
                method: req.method,
                reference: req.reference.clone(),
                paid_at: Some(now),
                concept: format!("Pago de declaración {}", d.period),
                receipt_path: None,
            };
            payment = Some(Payment::record(Uuid::new_v4(), draft, &actor, now)?);
            d.status = DeclarationStatus::Paid;
            d.updated_at = now;
            Ok::<_, AppError>(d.clone())
        })
        .ok_or_else(|| AppError::not_found("declaration", id))??;
    let payment =
        payment.ok_or_else(|| AppError::Internal("declaration payment was not recorded".into()))?;

    state.payments.insert(payment.id, payment.clone());
    state.persist(&payment).await?;
    state.persist(&declaration).await?;
    tracing::info!(
        declaration_id = %id,
        payment_id = %payment.id,
        amount = %payment.amount,
        "declaration paid"
    );

    Ok(Json(DeclarationPaymentResponse {
        declaration,
        payment,
    }))
}

/// GET /tributario/declaraciones/export — Spreadsheet of the filtered declarations.
pub async fn export_declarations(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<DeclarationFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut declarations = state.declarations.filter(|d| filter.matches(d));
    declarations.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let mut sheet = Sheet::new("Declaraciones", EXPORT_HEADERS);
    for d in declarations {
        let taxpayer = state.taxpayers.get(&d.taxpayer_id);
        let tax = state.taxes.get(&d.tax_id);
        sheet.push(vec![
            d.id.to_string().into(),
            taxpayer.as_ref().map(|t| t.display_name()).into(),
            taxpayer.map(|t| t.tax_id).into(),
            tax.map(|t| t.name).into(),
            d.period.into(),
            d.taxable_base.into(),
            d.amount.into(),
            d.status.as_str().into(),
            d.created_at.into(),
        ]);
    }
    sheet.into_response("declaraciones.xlsx")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declaration(status: DeclarationStatus) -> Declaration {
        let now = Utc::now();
        Declaration {
            id: Uuid::new_v4(),
            taxpayer_id: Uuid::new_v4(),
            tax_id: Uuid::new_v4(),
            period: "2025-03".into(),
            taxable_base: Decimal::from(1000),
            amount: Decimal::from(30),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_pending_declarations_are_mutable() {
        assert!(require_pending(&declaration(DeclarationStatus::Pending), "amend").is_ok());
        let err = require_pending(&declaration(DeclarationStatus::Paid), "amend").unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m.contains("PAID")));
    }

    #[test]
    fn filter_by_status_and_period() {
        let d = declaration(DeclarationStatus::Pending);
        let filter = DeclarationFilter {
            status: Some(DeclarationStatus::Pending),
            period: Some("2025".into()),
            ..Default::default()
        };
        assert!(filter.matches(&d));
        let filter = DeclarationFilter {
            status: Some(DeclarationStatus::Voided),
            ..Default::default()
        };
        assert!(!filter.matches(&d));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let req = DeclarationRequest {
            taxpayer_id: Uuid::new_v4(),
            tax_id: Uuid::new_v4(),
            period: "2025-03".into(),
            taxable_base: Decimal::from(100),
            amount: Decimal::from(-1),
        };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }
}
