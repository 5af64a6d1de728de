//! # Taxpayer Registry API
//!
//! - **POST `/tributario/contribuyentes`** — register a taxpayer
//! - **GET `/tributario/contribuyentes`** — filtered, paginated list
//! - **GET `/tributario/contribuyentes/{id}`** — fetch one
//! - **PUT `/tributario/contribuyentes/{id}`** — replace details
//! - **PATCH `/tributario/contribuyentes/{id}/estado`** — activate / deactivate
//! - **DELETE `/tributario/contribuyentes/{id}`** — remove an unreferenced taxpayer
//! - **GET `/tributario/contribuyentes/estadisticas`** — counters
//! - **GET `/tributario/contribuyentes/export`** — spreadsheet
//!
//! The tax id (RIF) is unique across the registry.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::Utc;
use muni_core::{temporal, validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::export::Sheet;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::{AppState, Taxpayer, TaxpayerKind};

const MODULE: Module = Module::Taxpayers;

/// Spreadsheet columns.
pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "RIF",
    "Razón Social",
    "Nombre",
    "Apellido",
    "Email",
    "Teléfono",
    "Tipo",
    "Activo",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to register or update a taxpayer.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaxpayerRequest {
    /// Fiscal registry number (RIF), at most 20 characters.
    pub tax_id: String,
    pub business_name: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone: Option<String>,
    pub email: String,
    #[serde(default = "default_kind")]
    pub kind: TaxpayerKind,
    pub legal_representative: Option<String>,
    pub active: Option<bool>,
}

fn default_kind() -> TaxpayerKind {
    TaxpayerKind::NaturalPerson
}

impl TaxpayerRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("tax_id", &self.tax_id, 20)?;
        validation::limit_optional("business_name", self.business_name.as_deref(), 200)?;
        validation::require_text("first_name", &self.first_name, 100)?;
        validation::require_text("last_name", &self.last_name, 100)?;
        validation::require_text("address", &self.address, 300)?;
        validation::limit_optional("phone", self.phone.as_deref(), 20)?;
        validation::require_email("email", &self.email)?;
        validation::limit_optional(
            "legal_representative",
            self.legal_representative.as_deref(),
            200,
        )?;
        Ok(())
    }
}

/// Request to change the active flag.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActiveRequest {
    pub active: bool,
}

/// Taxpayer with its display name.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaxpayerView {
    #[serde(flatten)]
    pub taxpayer: Taxpayer,
    pub display_name: String,
}

impl From<Taxpayer> for TaxpayerView {
    fn from(taxpayer: Taxpayer) -> Self {
        Self {
            display_name: taxpayer.display_name(),
            taxpayer,
        }
    }
}

/// List filters.
#[derive(Debug, Default, Deserialize)]
pub struct TaxpayerFilter {
    /// Matches tax id, business name, first/last name or email.
    pub term: Option<String>,
    pub kind: Option<TaxpayerKind>,
    pub active: Option<bool>,
}

impl TaxpayerFilter {
    fn matches(&self, t: &Taxpayer) -> bool {
        self.kind.map_or(true, |k| t.kind == k)
            && self.active.map_or(true, |a| t.active == a)
            && super::matches_term(
                self.term.as_deref(),
                &[
                    t.tax_id.as_str(),
                    t.business_name.as_deref().unwrap_or_default(),
                    t.first_name.as_str(),
                    t.last_name.as_str(),
                    t.email.as_str(),
                ],
            )
    }
}

/// Registry counters.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaxpayerStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub created_this_month: usize,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tributario/contribuyentes", get(list_taxpayers))
        .route(
            "/tributario/contribuyentes",
            post(create_taxpayer).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/tributario/contribuyentes/estadisticas", get(taxpayer_stats))
        .route(
            "/tributario/contribuyentes/export",
            get(export_taxpayers).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/tributario/contribuyentes/{id}", get(get_taxpayer))
        .route(
            "/tributario/contribuyentes/{id}",
            put(update_taxpayer).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/contribuyentes/{id}",
            delete(delete_taxpayer).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/tributario/contribuyentes/{id}/estado",
            patch(set_taxpayer_active).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /tributario/contribuyentes — Register a taxpayer.
#[utoipa::path(
    post,
    path = "/tributario/contribuyentes",
    request_body = TaxpayerRequest,
    responses(
        (status = 201, description = "Taxpayer registered", body = TaxpayerView),
        (status = 409, description = "Duplicate tax id", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "taxpayers"
)]
pub async fn create_taxpayer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TaxpayerRequest>, JsonRejection>,
) -> Result<Created<TaxpayerView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;

    let tax_id = req.tax_id.trim().to_string();
    if state.taxpayers.any(|t| t.tax_id.eq_ignore_ascii_case(&tax_id)) {
        return Err(AppError::Conflict(format!(
            "a taxpayer with tax id {tax_id} already exists"
        )));
    }

    let now = Utc::now();
    let taxpayer = Taxpayer {
        id: Uuid::new_v4(),
        tax_id,
        business_name: req.business_name,
        first_name: req.first_name,
        last_name: req.last_name,
        address: req.address,
        phone: req.phone,
        email: req.email.trim().to_string(),
        kind: req.kind,
        legal_representative: req.legal_representative,
        active: req.active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };

    state.taxpayers.insert(taxpayer.id, taxpayer.clone());
    state.persist(&taxpayer).await?;
    tracing::info!(taxpayer_id = %taxpayer.id, tax_id = %taxpayer.tax_id, "taxpayer registered");

    Ok(created(taxpayer.id, taxpayer.into()))
}

/// GET /tributario/contribuyentes — List taxpayers.
#[utoipa::path(
    get,
    path = "/tributario/contribuyentes",
    params(
        ("term" = Option<String>, Query, description = "Matches tax id, names or email"),
        ("kind" = Option<TaxpayerKind>, Query, description = "Taxpayer kind"),
        ("active" = Option<bool>, Query, description = "Active flag"),
        ("limit" = Option<usize>, Query, description = "Page size (default 100, max 1000)"),
        ("offset" = Option<usize>, Query, description = "Records to skip"),
    ),
    responses((status = 200, description = "Page of taxpayers", body = serde_json::Value)),
    tag = "taxpayers"
)]
pub async fn list_taxpayers(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<TaxpayerFilter>,
) -> Result<Json<Page<TaxpayerView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.taxpayers.filter(|t| filter.matches(t));
    Ok(Json(paginate(items, &page).map(TaxpayerView::from)))
}

/// GET /tributario/contribuyentes/{id} — Fetch a taxpayer.
#[utoipa::path(
    get,
    path = "/tributario/contribuyentes/{id}",
    params(("id" = Uuid, Path, description = "Taxpayer ID")),
    responses(
        (status = 200, description = "Taxpayer found", body = TaxpayerView),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
    ),
    tag = "taxpayers"
)]
pub async fn get_taxpayer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TaxpayerView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    super::require_taxpayer(&state, id).map(|t| Json(t.into()))
}

/// PUT /tributario/contribuyentes/{id} — Replace a taxpayer's details.
#[utoipa::path(
    put,
    path = "/tributario/contribuyentes/{id}",
    params(("id" = Uuid, Path, description = "Taxpayer ID")),
    request_body = TaxpayerRequest,
    responses(
        (status = 200, description = "Taxpayer updated", body = TaxpayerView),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 409, description = "Tax id belongs to another taxpayer", body = crate::error::ErrorBody),
    ),
    tag = "taxpayers"
)]
pub async fn update_taxpayer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<TaxpayerRequest>, JsonRejection>,
) -> Result<Json<TaxpayerView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;

    let tax_id = req.tax_id.trim().to_string();
    if state
        .taxpayers
        .any(|t| t.id != id && t.tax_id.eq_ignore_ascii_case(&tax_id))
    {
        return Err(AppError::Conflict(format!(
            "tax id {tax_id} belongs to another taxpayer"
        )));
    }

    let taxpayer = state
        .taxpayers
        .update(&id, |t| {
            t.tax_id = tax_id;
            t.business_name = req.business_name;
            t.first_name = req.first_name;
            t.last_name = req.last_name;
            t.address = req.address;
            t.phone = req.phone;
            t.email = req.email.trim().to_string();
            t.kind = req.kind;
            t.legal_representative = req.legal_representative;
            if let Some(active) = req.active {
                t.active = active;
            }
            t.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("taxpayer", id))?;
    state.persist(&taxpayer).await?;

    Ok(Json(taxpayer.into()))
}

/// PATCH /tributario/contribuyentes/{id}/estado — Activate or deactivate.
#[utoipa::path(
    patch,
    path = "/tributario/contribuyentes/{id}/estado",
    params(("id" = Uuid, Path, description = "Taxpayer ID")),
    request_body = ActiveRequest,
    responses(
        (status = 200, description = "Active flag updated", body = TaxpayerView),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
    ),
    tag = "taxpayers"
)]
pub async fn set_taxpayer_active(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ActiveRequest>, JsonRejection>,
) -> Result<Json<TaxpayerView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let taxpayer = state
        .taxpayers
        .update(&id, |t| {
            t.active = req.active;
            t.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("taxpayer", id))?;
    state.persist(&taxpayer).await?;
    Ok(Json(taxpayer.into()))
}

/// DELETE /tributario/contribuyentes/{id} — Remove a taxpayer nothing refers to.
#[utoipa::path(
    delete,
    path = "/tributario/contribuyentes/{id}",
    params(("id" = Uuid, Path, description = "Taxpayer ID")),
    responses(
        (status = 204, description = "Taxpayer deleted"),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 409, description = "Taxpayer still referenced", body = crate::error::ErrorBody),
    ),
    tag = "taxpayers"
)]
pub async fn delete_taxpayer(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    super::require_taxpayer(&state, id)?;

    let referenced_by = [
        ("fines", state.fines.any(|f| f.taxpayer_id == id)),
        ("levies", state.levies.any(|l| l.taxpayer_id == id)),
        ("services", state.services.any(|s| s.taxpayer_id == id)),
        ("payments", state.payments.any(|p| p.taxpayer_id == id)),
        ("declarations", state.declarations.any(|d| d.taxpayer_id == id)),
        ("withholdings", state.withholdings.any(|w| w.taxpayer_id == id)),
        ("vouchers", state.vouchers.any(|v| v.taxpayer_id == id)),
    ];
    let blocking: Vec<&str> = referenced_by
        .iter()
        .filter(|(_, referenced)| *referenced)
        .map(|(name, _)| *name)
        .collect();
    if !blocking.is_empty() {
        return Err(AppError::Conflict(format!(
            "taxpayer {id} is still referenced by {}",
            blocking.join(", ")
        )));
    }

    state.taxpayers.remove(&id);
    state.forget::<Taxpayer>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /tributario/contribuyentes/estadisticas — Registry counters.
#[utoipa::path(
    get,
    path = "/tributario/contribuyentes/estadisticas",
    responses((status = 200, description = "Registry counters", body = TaxpayerStats)),
    tag = "taxpayers"
)]
pub async fn taxpayer_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<TaxpayerStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let now = Utc::now();
    let all = state.taxpayers.list();
    let active = all.iter().filter(|t| t.active).count();
    Ok(Json(TaxpayerStats {
        total: all.len(),
        active,
        inactive: all.len() - active,
        created_this_month: all
            .iter()
            .filter(|t| temporal::same_month(&t.created_at, &now))
            .count(),
    }))
}

/// GET /tributario/contribuyentes/export — Spreadsheet of the filtered registry.
pub async fn export_taxpayers(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<TaxpayerFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut taxpayers = state.taxpayers.filter(|t| filter.matches(t));
    taxpayers.sort_by(|a, b| a.tax_id.cmp(&b.tax_id));

    let mut sheet = Sheet::new("Contribuyentes", EXPORT_HEADERS);
    for t in taxpayers {
        sheet.push(vec![
            t.id.to_string().into(),
            t.tax_id.into(),
            t.business_name.into(),
            t.first_name.into(),
            t.last_name.into(),
            t.email.into(),
            t.phone.into(),
            t.kind.as_str().into(),
            t.active.into(),
        ]);
    }
    sheet.into_response("contribuyentes.xlsx")
}
