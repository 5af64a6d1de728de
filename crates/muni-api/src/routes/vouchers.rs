//! # Fiscal Vouchers API
//!
//! Invoices, receipts and credit/debit notes under `/tributario/comprobantes`.
//! The `(kind, series, number)` triple identifies a voucher and is unique;
//! `total` is always `subtotal + tax`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{Datelike, NaiveDate, Utc};
use muni_core::{money, validation};
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
use crate::state::{AppState, Voucher, VoucherKind, VoucherStatus};

const MODULE: Module = Module::Vouchers;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Contribuyente",
    "RIF",
    "Tipo",
    "Serie",
    "Número",
    "Fecha Emisión",
    "Subtotal",
    "Impuesto",
    "Total",
    "Estado",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct VoucherRequest {
    pub taxpayer_id: Uuid,
    pub kind: VoucherKind,
    pub series: String,
    pub number: String,
    pub issue_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub status: Option<VoucherStatus>,
}

impl VoucherRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("series", &self.series, 10)?;
        validation::require_text("number", &self.number, 20)?;
        money::require_positive("subtotal", self.subtotal)?;
        money::check_precision("subtotal", self.subtotal, 13, 2)?;
        money::require_non_negative("tax", self.tax)?;
        money::check_precision("tax", self.tax, 13, 2)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VoucherFilter {
    pub taxpayer_id: Option<Uuid>,
    pub kind: Option<VoucherKind>,
    pub status: Option<VoucherStatus>,
}

impl VoucherFilter {
    fn matches(&self, v: &Voucher) -> bool {
        self.taxpayer_id.map_or(true, |id| v.taxpayer_id == id)
            && self.kind.map_or(true, |k| v.kind == k)
            && self.status.map_or(true, |s| v.status == s)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VoucherStats {
    pub total: usize,
    /// Vouchers issued in the current calendar month.
    pub this_month: usize,
    pub overdue: usize,
    /// Sum of totals of vouchers still in status ISSUED.
    pub issued_amount: Decimal,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tributario/comprobantes", get(list_vouchers))
        .route(
            "/tributario/comprobantes",
            post(create_voucher).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/tributario/comprobantes/estadisticas", get(voucher_stats))
        .route(
            "/tributario/comprobantes/export",
            get(export_vouchers).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/tributario/comprobantes/{id}", get(get_voucher))
        .route(
            "/tributario/comprobantes/{id}",
            put(update_voucher).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/comprobantes/{id}",
            delete(delete_voucher).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/tributario/comprobantes/{id}/estado",
            put(change_voucher_status).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn duplicate(state: &AppState, req: &VoucherRequest, except: Option<Uuid>) -> Result<(), AppError> {
    let series = req.series.trim();
    let number = req.number.trim();
    if state.vouchers.any(|v| {
        Some(v.id) != except && v.kind == req.kind && v.series == series && v.number == number
    }) {
        return Err(AppError::Conflict(format!(
            "a {} voucher {series}-{number} already exists",
            req.kind.as_str()
        )));
    }
    Ok(())
}

/// POST /tributario/comprobantes — Issue a voucher.
#[utoipa::path(
    post,
    path = "/tributario/comprobantes",
    request_body = VoucherRequest,
    responses(
        (status = 201, description = "Voucher issued", body = Voucher),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate kind, series and number", body = crate::error::ErrorBody),
    ),
    tag = "vouchers"
)]
pub async fn create_voucher(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<VoucherRequest>, JsonRejection>,
) -> Result<Created<Voucher>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    super::require_taxpayer(&state, req.taxpayer_id)?;
    duplicate(&state, &req, None)?;

    let now = Utc::now();
    let voucher = Voucher {
        id: Uuid::new_v4(),
        taxpayer_id: req.taxpayer_id,
        kind: req.kind,
        series: req.series.trim().to_string(),
        number: req.number.trim().to_string(),
        issue_date: req.issue_date,
        subtotal: req.subtotal,
        tax: req.tax,
        total: req.subtotal + req.tax,
        status: req.status.unwrap_or(VoucherStatus::Issued),
        created_at: now,
        updated_at: now,
    };
    state.vouchers.insert(voucher.id, voucher.clone());
    state.persist(&voucher).await?;

    Ok(created(voucher.id, voucher))
}

/// GET /tributario/comprobantes — List vouchers.
#[utoipa::path(
    get,
    path = "/tributario/comprobantes",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Owning taxpayer"),
        ("kind" = Option<VoucherKind>, Query, description = "Voucher kind"),
        ("status" = Option<VoucherStatus>, Query, description = "Voucher status"),
    ),
    responses((status = 200, description = "Page of vouchers", body = serde_json::Value)),
    tag = "vouchers"
)]
pub async fn list_vouchers(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<VoucherFilter>,
) -> Result<Json<Page<Voucher>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.vouchers.filter(|v| filter.matches(v));
    Ok(Json(paginate(items, &page)))
}

/// GET /tributario/comprobantes/{id} — Fetch a voucher.
pub async fn get_voucher(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Voucher>, AppError> {
    caller.require(MODULE, Access::Read)?;
    state
        .vouchers
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("voucher", id))
}

/// PUT /tributario/comprobantes/{id} — Update a voucher.
#[utoipa::path(
    put,
    path = "/tributario/comprobantes/{id}",
    params(("id" = Uuid, Path, description = "Voucher ID")),
    request_body = VoucherRequest,
    responses(
        (status = 200, description = "Voucher updated", body = Voucher),
        (status = 404, description = "Voucher not found", body = crate::error::ErrorBody),
        (status = 409, description = "Kind, series and number belong to another voucher", body = crate::error::ErrorBody),
    ),
    tag = "vouchers"
)]
pub async fn update_voucher(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<VoucherRequest>, JsonRejection>,
) -> Result<Json<Voucher>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    super::require_taxpayer(&state, req.taxpayer_id)?;
    duplicate(&state, &req, Some(id))?;

    let voucher = state
        .vouchers
        .update(&id, |v| {
            v.taxpayer_id = req.taxpayer_id;
            v.kind = req.kind;
            v.series = req.series.trim().to_string();
            v.number = req.number.trim().to_string();
            v.issue_date = req.issue_date;
            v.subtotal = req.subtotal;
            v.tax = req.tax;
            v.total = req.subtotal + req.tax;
            if let Some(status) = req.status {
                v.status = status;
            }
            v.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("voucher", id))?;
    state.persist(&voucher).await?;
    Ok(Json(voucher))
}

/// DELETE /tributario/comprobantes/{id} — Delete a voucher.
pub async fn delete_voucher(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    state
        .vouchers
        .remove(&id)
        .ok_or_else(|| AppError::not_found("voucher", id))?;
    state.forget::<Voucher>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /tributario/comprobantes/{id}/estado — Set the status explicitly.
pub async fn change_voucher_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusRequest<VoucherStatus>>, JsonRejection>,
) -> Result<Json<Voucher>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let voucher = state
        .vouchers
        .update(&id, |v| {
            v.status = req.status;
            v.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("voucher", id))?;
    state.persist(&voucher).await?;
    Ok(Json(voucher))
}

/// GET /tributario/comprobantes/estadisticas — Voucher counters.
#[utoipa::path(
    get,
    path = "/tributario/comprobantes/estadisticas",
    responses((status = 200, description = "Voucher counters", body = VoucherStats)),
    tag = "vouchers"
)]
pub async fn voucher_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<VoucherStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.vouchers.list(), super::today(Utc::now()))))
}

fn stats(vouchers: &[Voucher], today: NaiveDate) -> VoucherStats {
    VoucherStats {
        total: vouchers.len(),
        this_month: vouchers
            .iter()
            .filter(|v| v.issue_date.year() == today.year() && v.issue_date.month() == today.month())
            .count(),
        overdue: vouchers
            .iter()
            .filter(|v| v.status == VoucherStatus::Overdue)
            .count(),
        issued_amount: vouchers
            .iter()
            .filter(|v| v.status == VoucherStatus::Issued)
            .map(|v| v.total)
            .sum(),
    }
}

/// GET /tributario/comprobantes/export — Spreadsheet of the filtered vouchers.
pub async fn export_vouchers(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<VoucherFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut vouchers = state.vouchers.filter(|v| filter.matches(v));
    vouchers.sort_by(|a, b| b.issue_date.cmp(&a.issue_date));

    let mut sheet = Sheet::new("Comprobantes", EXPORT_HEADERS);
    for v in vouchers {
        let taxpayer = state.taxpayers.get(&v.taxpayer_id);
        sheet.push(vec![
            v.id.to_string().into(),
            taxpayer.as_ref().map(|t| t.display_name()).into(),
            taxpayer.map(|t| t.tax_id).into(),
            v.kind.as_str().into(),
            v.series.into(),
            v.number.into(),
            v.issue_date.into(),
            v.subtotal.into(),
            v.tax.into(),
            v.total.into(),
            v.status.as_str().into(),
        ]);
    }
    sheet.into_response("comprobantes.xlsx")
}
