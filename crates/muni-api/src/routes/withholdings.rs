//! # Withholdings API
//!
//! Tax withheld at source, under `/tributario/retenciones`. When the caller
//! leaves the withheld amount out (or sends zero), it is computed as
//! `base_amount × percentage / 100`, rounded to cents.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
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
use crate::state::{AppState, Withholding, WithholdingStatus};

const MODULE: Module = Module::Withholdings;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Contribuyente",
    "RIF",
    "Fecha",
    "Concepto",
    "Porcentaje",
    "Base Imponible",
    "Monto Retenido",
    "Estado",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct WithholdingRequest {
    pub taxpayer_id: Uuid,
    pub date: NaiveDate,
    pub concept: String,
    /// Percentage withheld, above 0 and at most 100.
    pub percentage: Decimal,
    pub base_amount: Decimal,
    /// Computed from base and percentage when absent or not positive.
    pub withheld_amount: Option<Decimal>,
    pub status: Option<WithholdingStatus>,
}

impl WithholdingRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("concept", &self.concept, 200)?;
        money::require_positive("percentage", self.percentage)?;
        money::require_between("percentage", self.percentage, Decimal::ZERO, Decimal::ONE_HUNDRED)?;
        money::require_positive("base_amount", self.base_amount)?;
        money::check_precision("base_amount", self.base_amount, 13, 2)?;
        Ok(())
    }

    /// The amount to record: the caller's when positive, otherwise computed.
    fn withheld(&self) -> Decimal {
        match self.withheld_amount {
            Some(amount) if amount > Decimal::ZERO => amount,
            _ => money::percentage_of(self.base_amount, self.percentage),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct WithholdingFilter {
    pub taxpayer_id: Option<Uuid>,
    pub status: Option<WithholdingStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl WithholdingFilter {
    fn matches(&self, w: &Withholding) -> bool {
        self.taxpayer_id.map_or(true, |id| w.taxpayer_id == id)
            && self.status.map_or(true, |s| w.status == s)
            && super::within_dates(w.date, self.from, self.to)
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WithholdingStats {
    pub total: usize,
    /// Count per status name.
    pub by_status: BTreeMap<String, usize>,
    /// Sum of withheld amounts in status APPLIED.
    pub applied_amount: Decimal,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tributario/retenciones", get(list_withholdings))
        .route(
            "/tributario/retenciones",
            post(create_withholding).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/tributario/retenciones/estadisticas", get(withholding_stats))
        .route(
            "/tributario/retenciones/exportar",
            get(export_withholdings).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/tributario/retenciones/{id}", get(get_withholding))
        .route(
            "/tributario/retenciones/{id}",
            put(update_withholding).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/tributario/retenciones/{id}",
            delete(delete_withholding).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/tributario/retenciones/{id}/estado",
            post(change_withholding_status).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /tributario/retenciones — Record a withholding.
#[utoipa::path(
    post,
    path = "/tributario/retenciones",
    request_body = WithholdingRequest,
    responses(
        (status = 201, description = "Withholding recorded", body = Withholding),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "withholdings"
)]
pub async fn create_withholding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<WithholdingRequest>, JsonRejection>,
) -> Result<Created<Withholding>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let now = Utc::now();
    let withholding = Withholding {
        id: Uuid::new_v4(),
        taxpayer_id: req.taxpayer_id,
        date: req.date,
        withheld_amount: req.withheld(),
        concept: req.concept.trim().to_string(),
        percentage: req.percentage,
        base_amount: req.base_amount,
        status: req.status.unwrap_or(WithholdingStatus::Pending),
        created_at: now,
        updated_at: now,
    };
    state.withholdings.insert(withholding.id, withholding.clone());
    state.persist(&withholding).await?;

    Ok(created(withholding.id, withholding))
}

/// GET /tributario/retenciones — List withholdings.
#[utoipa::path(
    get,
    path = "/tributario/retenciones",
    params(
        ("taxpayer_id" = Option<Uuid>, Query, description = "Owning taxpayer"),
        ("status" = Option<WithholdingStatus>, Query, description = "Withholding status"),
        ("from" = Option<NaiveDate>, Query, description = "Earliest date, inclusive"),
        ("to" = Option<NaiveDate>, Query, description = "Latest date, inclusive"),
    ),
    responses((status = 200, description = "Page of withholdings", body = serde_json::Value)),
    tag = "withholdings"
)]
pub async fn list_withholdings(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<WithholdingFilter>,
) -> Result<Json<Page<Withholding>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.withholdings.filter(|w| filter.matches(w));
    Ok(Json(paginate(items, &page)))
}

/// GET /tributario/retenciones/{id} — Fetch a withholding.
pub async fn get_withholding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Withholding>, AppError> {
    caller.require(MODULE, Access::Read)?;
    state
        .withholdings
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("withholding", id))
}

/// PUT /tributario/retenciones/{id} — Update a withholding.
#[utoipa::path(
    put,
    path = "/tributario/retenciones/{id}",
    params(("id" = Uuid, Path, description = "Withholding ID")),
    request_body = WithholdingRequest,
    responses(
        (status = 200, description = "Withholding updated", body = Withholding),
        (status = 404, description = "Withholding or taxpayer not found", body = crate::error::ErrorBody),
    ),
    tag = "withholdings"
)]
pub async fn update_withholding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<WithholdingRequest>, JsonRejection>,
) -> Result<Json<Withholding>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let withheld = req.withheld();
    let withholding = state
        .withholdings
        .update(&id, |w| {
            w.taxpayer_id = req.taxpayer_id;
            w.date = req.date;
            w.concept = req.concept.trim().to_string();
            w.percentage = req.percentage;
            w.base_amount = req.base_amount;
            w.withheld_amount = withheld;
            if let Some(status) = req.status {
                w.status = status;
            }
            w.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("withholding", id))?;
    state.persist(&withholding).await?;
    Ok(Json(withholding))
}

/// DELETE /tributario/retenciones/{id} — Delete a withholding.
pub async fn delete_withholding(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    state
        .withholdings
        .remove(&id)
        .ok_or_else(|| AppError::not_found("withholding", id))?;
    state.forget::<Withholding>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tributario/retenciones/{id}/estado — Set the status explicitly.
pub async fn change_withholding_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusRequest<WithholdingStatus>>, JsonRejection>,
) -> Result<Json<Withholding>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let withholding = state
        .withholdings
        .update(&id, |w| {
            w.status = req.status;
            w.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("withholding", id))?;
    state.persist(&withholding).await?;
    Ok(Json(withholding))
}

/// GET /tributario/retenciones/estadisticas — Counts by status and applied total.
#[utoipa::path(
    get,
    path = "/tributario/retenciones/estadisticas",
    responses((status = 200, description = "Withholding counters", body = WithholdingStats)),
    tag = "withholdings"
)]
pub async fn withholding_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<WithholdingStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.withholdings.list())))
}

fn stats(withholdings: &[Withholding]) -> WithholdingStats {
    let mut by_status = BTreeMap::new();
    for w in withholdings {
        *by_status.entry(w.status.as_str().to_string()).or_insert(0) += 1;
    }
    WithholdingStats {
        total: withholdings.len(),
        by_status,
        applied_amount: withholdings
            .iter()
            .filter(|w| w.status == WithholdingStatus::Applied)
            .map(|w| w.withheld_amount)
            .sum(),
    }
}

/// GET /tributario/retenciones/exportar — Spreadsheet of the filtered withholdings.
pub async fn export_withholdings(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<WithholdingFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut withholdings = state.withholdings.filter(|w| filter.matches(w));
    withholdings.sort_by(|a, b| b.date.cmp(&a.date));

    let mut sheet = Sheet::new("Retenciones", EXPORT_HEADERS);
    for w in withholdings {
        let taxpayer = state.taxpayers.get(&w.taxpayer_id);
        sheet.push(vec![
            w.id.to_string().into(),
            taxpayer.as_ref().map(|t| t.display_name()).into(),
            taxpayer.map(|t| t.tax_id).into(),
            w.date.into(),
            w.concept.into(),
            w.percentage.into(),
            w.base_amount.into(),
            w.withheld_amount.into(),
            w.status.as_str().into(),
        ]);
    }
    sheet.into_response("retenciones.xlsx")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn request(withheld: Option<&str>) -> WithholdingRequest {
        WithholdingRequest {
            taxpayer_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            concept: "Servicios profesionales".into(),
            percentage: d("3"),
            base_amount: d("1500.00"),
            withheld_amount: withheld.map(d),
            status: None,
        }
    }

    #[test]
    fn withheld_amount_is_computed_when_missing() {
        assert_eq!(request(None).withheld(), d("45.00"));
        assert_eq!(request(Some("0")).withheld(), d("45.00"));
        assert_eq!(request(Some("40.00")).withheld(), d("40.00"));
    }

    #[test]
    fn zero_percentage_is_rejected() {
        let mut req = request(None);
        req.percentage = Decimal::ZERO;
        assert!(matches!(req.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn stats_sum_only_applied() {
        let now = Utc::now();
        let make = |status, amount: &str| Withholding {
            id: Uuid::new_v4(),
            taxpayer_id: Uuid::new_v4(),
            date: now.date_naive(),
            concept: "x".into(),
            percentage: d("1"),
            base_amount: d("100"),
            withheld_amount: d(amount),
            status,
            created_at: now,
            updated_at: now,
        };
        let s = stats(&[
            make(WithholdingStatus::Applied, "10.00"),
            make(WithholdingStatus::Applied, "5.50"),
            make(WithholdingStatus::Pending, "99.00"),
        ]);
        assert_eq!(s.total, 3);
        assert_eq!(s.applied_amount, d("15.50"));
        assert_eq!(s.by_status.get("APPLIED"), Some(&2));
    }
}
