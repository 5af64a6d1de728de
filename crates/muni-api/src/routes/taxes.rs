//! # Tax Catalogue API
//!
//! CRUD over municipal taxes and their rates, under `/tributario/impuestos`.
//! Codes are unique; a tax referenced by a declaration cannot be deleted.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use muni_core::{money, validation};
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
use crate::state::{AppState, Tax};

const MODULE: Module = Module::Taxes;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Código",
    "Nombre",
    "Descripción",
    "Tasa (%)",
    "Fecha Creación",
];

/// Request to create or update a tax.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaxRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// Percentage between 0 and 100.
    pub rate: Decimal,
}

impl TaxRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("code", &self.code, 30)?;
        validation::require_text("name", &self.name, 100)?;
        validation::limit_optional("description", self.description.as_deref(), 500)?;
        money::require_between("rate", self.rate, Decimal::ZERO, Decimal::ONE_HUNDRED)?;
        money::check_precision("rate", self.rate, 3, 2)?;
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TaxFilter {
    /// Matches code or name.
    pub term: Option<String>,
}

/// Catalogue counters.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaxStats {
    pub total: usize,
    /// Taxes with a rate above zero.
    pub active: usize,
    pub average_rate: Decimal,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tributario/impuestos", get(list_taxes))
        .route(
            "/tributario/impuestos",
            post(create_tax).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/tributario/impuestos/estadisticas", get(tax_stats))
        .route(
            "/tributario/impuestos/export",
            get(export_taxes).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/tributario/impuestos/{id}", get(get_tax))
        .route(
            "/tributario/impuestos/{id}",
            put(update_tax).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/impuestos/{id}",
            delete(delete_tax).layer(layer(MODULE, AuditAction::Delete)),
        )
}

fn code_taken(state: &AppState, code: &str, except: Option<Uuid>) -> bool {
    state
        .taxes
        .any(|t| Some(t.id) != except && t.code.eq_ignore_ascii_case(code))
}

/// POST /tributario/impuestos — Create a tax.
#[utoipa::path(
    post,
    path = "/tributario/impuestos",
    request_body = TaxRequest,
    responses(
        (status = 201, description = "Tax created", body = Tax),
        (status = 409, description = "Duplicate code", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "taxes"
)]
pub async fn create_tax(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TaxRequest>, JsonRejection>,
) -> Result<Created<Tax>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;

    let code = req.code.trim().to_uppercase();
    if code_taken(&state, &code, None) {
        return Err(AppError::Conflict(format!("tax code {code} already exists")));
    }

    let now = Utc::now();
    let tax = Tax {
        id: Uuid::new_v4(),
        code,
        name: req.name.trim().to_string(),
        description: req.description,
        rate: req.rate,
        created_at: now,
        updated_at: now,
    };
    state.taxes.insert(tax.id, tax.clone());
    state.persist(&tax).await?;

    Ok(created(tax.id, tax))
}

/// GET /tributario/impuestos — List taxes.
#[utoipa::path(
    get,
    path = "/tributario/impuestos",
    responses((status = 200, description = "Page of taxes", body = serde_json::Value)),
    tag = "taxes"
)]
pub async fn list_taxes(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<TaxFilter>,
) -> Result<Json<Page<Tax>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state
        .taxes
        .filter(|t| super::matches_term(filter.term.as_deref(), &[t.code.as_str(), t.name.as_str()]));
    Ok(Json(paginate(items, &page)))
}

/// GET /tributario/impuestos/{id} — Fetch a tax.
#[utoipa::path(
    get,
    path = "/tributario/impuestos/{id}",
    params(("id" = Uuid, Path, description = "Tax ID")),
    responses(
        (status = 200, description = "Tax found", body = Tax),
        (status = 404, description = "Tax not found", body = crate::error::ErrorBody),
    ),
    tag = "taxes"
)]
pub async fn get_tax(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Tax>, AppError> {
    caller.require(MODULE, Access::Read)?;
    state
        .taxes
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("tax", id))
}

/// PUT /tributario/impuestos/{id} — Update a tax.
#[utoipa::path(
    put,
    path = "/tributario/impuestos/{id}",
    params(("id" = Uuid, Path, description = "Tax ID")),
    request_body = TaxRequest,
    responses(
        (status = 200, description = "Tax updated", body = Tax),
        (status = 404, description = "Tax not found", body = crate::error::ErrorBody),
        (status = 409, description = "Code belongs to another tax", body = crate::error::ErrorBody),
    ),
    tag = "taxes"
)]
pub async fn update_tax(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<TaxRequest>, JsonRejection>,
) -> Result<Json<Tax>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;

    let code = req.code.trim().to_uppercase();
    if code_taken(&state, &code, Some(id)) {
        return Err(AppError::Conflict(format!("tax code {code} belongs to another tax")));
    }

    let tax = state
        .taxes
        .update(&id, |t| {
            t.code = code;
            t.name = req.name.trim().to_string();
            t.description = req.description;
            t.rate = req.rate;
            t.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("tax", id))?;
    state.persist(&tax).await?;
    Ok(Json(tax))
}

/// DELETE /tributario/impuestos/{id} — Delete a tax no declaration uses.
#[utoipa::path(
    delete,
    path = "/tributario/impuestos/{id}",
    params(("id" = Uuid, Path, description = "Tax ID")),
    responses(
        (status = 204, description = "Tax deleted"),
        (status = 404, description = "Tax not found", body = crate::error::ErrorBody),
        (status = 409, description = "Tax referenced by declarations", body = crate::error::ErrorBody),
    ),
    tag = "taxes"
)]
pub async fn delete_tax(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    if !state.taxes.contains(&id) {
        return Err(AppError::not_found("tax", id));
    }
    if state.declarations.any(|d| d.tax_id == id) {
        return Err(AppError::Conflict(format!(
            "tax {id} is referenced by declarations"
        )));
    }
    state.taxes.remove(&id);
    state.forget::<Tax>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /tributario/impuestos/estadisticas — Catalogue counters.
pub async fn tax_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<TaxStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.taxes.list())))
}

fn stats(taxes: &[Tax]) -> TaxStats {
    let total = taxes.len();
    let sum: Decimal = taxes.iter().map(|t| t.rate).sum();
    TaxStats {
        total,
        active: taxes.iter().filter(|t| t.rate > Decimal::ZERO).count(),
        average_rate: if total == 0 {
            Decimal::ZERO
        } else {
            money::round_currency(sum / Decimal::from(total))
        },
    }
}

/// GET /tributario/impuestos/export — Spreadsheet of the catalogue.
pub async fn export_taxes(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut taxes = state.taxes.list();
    taxes.sort_by(|a, b| a.code.cmp(&b.code));

    let mut sheet = Sheet::new("Impuestos", EXPORT_HEADERS);
    for t in taxes {
        sheet.push(vec![
            t.id.to_string().into(),
            t.code.into(),
            t.name.into(),
            t.description.into(),
            t.rate.into(),
            t.created_at.into(),
        ]);
    }
    sheet.into_response("impuestos.xlsx")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tax(rate: i64) -> Tax {
        let now = Utc::now();
        Tax {
            id: Uuid::new_v4(),
            code: format!("T{rate}"),
            name: "x".into(),
            description: None,
            rate: Decimal::from(rate),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stats_average_and_active() {
        let s = stats(&[tax(0), tax(10), tax(20)]);
        assert_eq!(s.total, 3);
        assert_eq!(s.active, 2);
        assert_eq!(s.average_rate, Decimal::from(10));
    }

    #[test]
    fn stats_of_empty_catalogue() {
        assert_eq!(stats(&[]).average_rate, Decimal::ZERO);
    }

    #[test]
    fn rate_above_hundred_is_rejected() {
        let req = TaxRequest {
            code: "IAE".into(),
            name: "Actividades económicas".into(),
            description: None,
            rate: Decimal::from(101),
        };
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }
}
