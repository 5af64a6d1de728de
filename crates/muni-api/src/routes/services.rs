//! # Utility Services API
//!
//! Municipal utility contracts under `/servicios`, numbered
//! `SRV-yyyyMM-NNNN`. Metered services are billed per reading; flat-rate
//! services start billed at their base rate.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use muni_core::ReferenceKind;
use muni_state::{Payable, Service, ServiceDraft, ServiceStatus, ServiceType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created, PaymentAmount, StatusRequest};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::AppState;

const MODULE: Module = Module::Services;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct ServiceRequest {
    pub taxpayer_id: Uuid,
    #[schema(value_type = String, example = "DRINKING_WATER")]
    pub service_type: ServiceType,
    /// Defaults to ACTIVE on creation; ignored on update.
    #[schema(value_type = Option<String>)]
    pub status: Option<ServiceStatus>,
    pub base_rate: Decimal,
    pub current_reading: Option<Decimal>,
    pub previous_reading: Option<Decimal>,
    pub billed_amount: Option<Decimal>,
    pub installed_on: Option<NaiveDate>,
    pub last_reading_on: Option<NaiveDate>,
    pub next_reading_on: Option<NaiveDate>,
    pub cut_off_on: Option<NaiveDate>,
    pub address: Option<String>,
    pub meter: Option<String>,
    pub notes: Option<String>,
}

impl From<ServiceRequest> for ServiceDraft {
    fn from(req: ServiceRequest) -> Self {
        Self {
            taxpayer_id: req.taxpayer_id,
            service_type: req.service_type,
            status: req.status,
            base_rate: req.base_rate,
            current_reading: req.current_reading,
            previous_reading: req.previous_reading,
            billed_amount: req.billed_amount,
            installed_on: req.installed_on,
            last_reading_on: req.last_reading_on,
            next_reading_on: req.next_reading_on,
            cut_off_on: req.cut_off_on,
            address: req.address,
            meter: req.meter,
            notes: req.notes,
        }
    }
}

/// A new meter reading.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadingRequest {
    pub reading: Decimal,
    /// Defaults to today.
    pub read_on: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: Service,
    pub balance: Decimal,
    pub consumption: Decimal,
    pub has_debt: bool,
    pub taxpayer_name: String,
}

impl ServiceView {
    fn build(state: &AppState, service: Service) -> Self {
        Self {
            balance: service.balance(),
            consumption: service.consumption(),
            has_debt: service.has_debt(),
            taxpayer_name: super::taxpayer_name(state, service.taxpayer_id),
            service,
        }
    }
}

/// Reading outcome: the service and the amount just billed.
#[derive(Debug, Serialize)]
pub struct ReadingResponse {
    pub service: ServiceView,
    pub charge: Decimal,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceFilter {
    /// Substring of the service number.
    pub number: Option<String>,
    /// Substring of the taxpayer's display name.
    pub taxpayer: Option<String>,
    pub status: Option<ServiceStatus>,
    pub service_type: Option<ServiceType>,
}

impl ServiceFilter {
    fn matches(&self, state: &AppState, s: &Service) -> bool {
        self.status.map_or(true, |st| s.status == st)
            && self.service_type.map_or(true, |t| s.service_type == t)
            && super::matches_term(self.number.as_deref(), &[s.number.as_str()])
            && (self.taxpayer.is_none()
                || super::matches_term(
                    self.taxpayer.as_deref(),
                    &[super::taxpayer_name(state, s.taxpayer_id).as_str()],
                ))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_type: BTreeMap<String, usize>,
    pub billed: Decimal,
    pub paid: Decimal,
    pub pending: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceTypeEntry {
    pub value: String,
    pub description: String,
    pub requires_meter: bool,
    pub flat_rate: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatusEntry {
    pub value: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/servicios", get(list_services))
        .route(
            "/servicios",
            post(create_service).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/servicios/estadisticas", get(service_stats))
        .route("/servicios/tipos", get(service_types))
        .route("/servicios/estados", get(service_statuses))
        .route("/servicios/por-cortar", get(due_for_cut_off))
        .route("/servicios/{id}", get(get_service))
        .route(
            "/servicios/{id}",
            put(update_service).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/servicios/{id}",
            delete(delete_service).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/servicios/{id}/pago",
            post(pay_service).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/servicios/{id}/estado",
            put(change_service_status).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/servicios/{id}/lectura",
            post(record_reading).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /servicios — Register a service.
#[utoipa::path(
    post,
    path = "/servicios",
    request_body = ServiceRequest,
    responses(
        (status = 201, description = "Service registered", body = serde_json::Value),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn create_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ServiceRequest>, JsonRejection>,
) -> Result<Created<ServiceView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let draft = ServiceDraft::from(req);
    draft.validate()?;
    let now = Utc::now();
    let number = state
        .allocate_reference(ReferenceKind::Service, now, |n| {
            state.services.any(|s| s.number == n)
        })
        .await?;

    let service = Service::install(Uuid::new_v4(), number, draft, &caller.actor(), now)?;
    state.services.insert(service.id, service.clone());
    state.persist(&service).await?;
    tracing::info!(service_id = %service.id, number = %service.number, kind = %service.service_type, "service registered");

    Ok(created(service.id, ServiceView::build(&state, service)))
}

/// GET /servicios — List services.
#[utoipa::path(
    get,
    path = "/servicios",
    params(
        ("number" = Option<String>, Query, description = "Service number substring"),
        ("taxpayer" = Option<String>, Query, description = "Taxpayer name substring"),
        ("status" = Option<String>, Query, description = "Service status"),
        ("service_type" = Option<String>, Query, description = "Service type"),
    ),
    responses((status = 200, description = "Page of services", body = serde_json::Value)),
    tag = "services"
)]
pub async fn list_services(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<ServiceFilter>,
) -> Result<Json<Page<ServiceView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.services.filter(|s| filter.matches(&state, s));
    Ok(Json(
        paginate(items, &page).map(|s| ServiceView::build(&state, s)),
    ))
}

/// GET /servicios/{id} — Fetch a service.
pub async fn get_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let service = state
        .services
        .get(&id)
        .ok_or_else(|| AppError::not_found("service", id))?;
    Ok(Json(ServiceView::build(&state, service)))
}

/// PUT /servicios/{id} — Amend a service.
#[utoipa::path(
    put,
    path = "/servicios/{id}",
    params(("id" = Uuid, Path, description = "Service ID")),
    request_body = ServiceRequest,
    responses(
        (status = 200, description = "Service amended", body = serde_json::Value),
        (status = 404, description = "Service or taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Billed amount below what was paid", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn update_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ServiceRequest>, JsonRejection>,
) -> Result<Json<ServiceView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    super::require_taxpayer(&state, req.taxpayer_id)?;

    let actor = caller.actor();
    let draft = ServiceDraft::from(req);
    let service = super::apply(&state.services, "service", id, |s| {
        s.amend(draft, &actor, Utc::now())
    })?;
    state.persist(&service).await?;
    Ok(Json(ServiceView::build(&state, service)))
}

/// DELETE /servicios/{id} — Delete a service without debt.
#[utoipa::path(
    delete,
    path = "/servicios/{id}",
    params(("id" = Uuid, Path, description = "Service ID")),
    responses(
        (status = 204, description = "Service deleted"),
        (status = 404, description = "Service not found", body = crate::error::ErrorBody),
        (status = 409, description = "Service has pending debt", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn delete_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let service = state
        .services
        .get(&id)
        .ok_or_else(|| AppError::not_found("service", id))?;
    if service.has_debt() {
        return Err(AppError::Conflict(format!(
            "service {} still owes {}",
            service.number,
            service.balance()
        )));
    }
    state.services.remove(&id);
    state.forget::<Service>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /servicios/{id}/pago — Register a payment against a service.
#[utoipa::path(
    post,
    path = "/servicios/{id}/pago",
    params(("id" = Uuid, Path, description = "Service ID")),
    request_body = PaymentAmount,
    responses(
        (status = 200, description = "Payment registered", body = serde_json::Value),
        (status = 409, description = "Service cannot be billed", body = crate::error::ErrorBody),
        (status = 422, description = "Amount not positive or above the balance", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn pay_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PaymentAmount>, JsonRejection>,
) -> Result<Json<ServiceView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let service = super::apply(&state.services, "service", id, |s| {
        s.register_payment(req.amount, &actor, Utc::now()).map(|_| ())
    })?;
    state.persist(&service).await?;
    tracing::info!(service_id = %id, amount = %req.amount, status = %service.status, "service payment registered");
    Ok(Json(ServiceView::build(&state, service)))
}

/// PUT /servicios/{id}/estado — Change the service status.
#[utoipa::path(
    put,
    path = "/servicios/{id}/estado",
    params(("id" = Uuid, Path, description = "Service ID")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Status changed", body = serde_json::Value),
        (status = 409, description = "Transition not allowed or debt outstanding", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn change_service_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusRequest<ServiceStatus>>, JsonRejection>,
) -> Result<Json<ServiceView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let service = super::apply(&state.services, "service", id, |s| {
        s.change_status(req.status, &actor, Utc::now())
    })?;
    state.persist(&service).await?;
    Ok(Json(ServiceView::build(&state, service)))
}

/// POST /servicios/{id}/lectura — Record a meter reading and bill it.
#[utoipa::path(
    post,
    path = "/servicios/{id}/lectura",
    params(("id" = Uuid, Path, description = "Service ID")),
    request_body = ReadingRequest,
    responses(
        (status = 200, description = "Reading recorded", body = serde_json::Value),
        (status = 409, description = "Service is not metered or cannot be billed", body = crate::error::ErrorBody),
        (status = 422, description = "Reading below the current one", body = crate::error::ErrorBody),
    ),
    tag = "services"
)]
pub async fn record_reading(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReadingRequest>, JsonRejection>,
) -> Result<Json<ReadingResponse>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let actor = caller.actor();
    let now = Utc::now();
    let read_on = req.read_on.unwrap_or_else(|| super::today(now));

    let service = state
        .services
        .try_update(&id, |s| {
            let charge = s.record_reading(req.reading, read_on, &actor, now)?;
            Ok::<_, AppError>((s.clone(), charge))
        })
        .ok_or_else(|| AppError::not_found("service", id))?;
    let (service, charge) = service?;
    state.persist(&service).await?;
    tracing::info!(service_id = %id, reading = %req.reading, charge = %charge, "meter reading recorded");

    Ok(Json(ReadingResponse {
        service: ServiceView::build(&state, service),
        charge,
    }))
}

/// GET /servicios/estadisticas — Service counters and amounts.
#[utoipa::path(
    get,
    path = "/servicios/estadisticas",
    responses((status = 200, description = "Service counters", body = ServiceStats)),
    tag = "services"
)]
pub async fn service_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ServiceStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.services.list())))
}

fn stats(services: &[Service]) -> ServiceStats {
    let mut by_status = BTreeMap::new();
    let mut by_type = BTreeMap::new();
    for s in services {
        *by_status.entry(s.status.as_str().to_string()).or_insert(0) += 1;
        *by_type.entry(s.service_type.as_str().to_string()).or_insert(0) += 1;
    }
    ServiceStats {
        total: services.len(),
        by_status,
        by_type,
        billed: services.iter().map(|s| s.ledger.amount_due).sum(),
        paid: services.iter().map(|s| s.ledger.amount_paid).sum(),
        pending: services.iter().map(|s| s.balance()).sum(),
    }
}

/// GET /servicios/tipos — Service type catalogue.
pub async fn service_types(caller: CallerIdentity) -> Result<Json<Vec<ServiceTypeEntry>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(
        ServiceType::ALL
            .iter()
            .map(|t| ServiceTypeEntry {
                value: t.as_str().to_string(),
                description: t.description().to_string(),
                requires_meter: t.requires_meter(),
                flat_rate: t.flat_rate(),
            })
            .collect(),
    ))
}

/// GET /servicios/estados — Service status catalogue.
pub async fn service_statuses(
    caller: CallerIdentity,
) -> Result<Json<Vec<ServiceStatusEntry>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(
        ServiceStatus::ALL
            .iter()
            .map(|s| ServiceStatusEntry {
                value: s.as_str().to_string(),
                description: s.description().to_string(),
            })
            .collect(),
    ))
}

/// GET /servicios/por-cortar — Services past their cut-off date with debt.
pub async fn due_for_cut_off(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<ServiceView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let today = super::today(Utc::now());
    let mut due = state
        .services
        .filter(|s| s.status.can_be_cut() && s.is_due_for_cut_off(today));
    due.sort_by(|a, b| a.cut_off_on.cmp(&b.cut_off_on));
    Ok(Json(
        due.into_iter()
            .map(|s| ServiceView::build(&state, s))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use muni_core::Actor;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn service(kind: ServiceType, billed: &str) -> Service {
        Service::install(
            Uuid::new_v4(),
            "SRV-202503-0001".into(),
            ServiceDraft {
                taxpayer_id: Uuid::new_v4(),
                service_type: kind,
                status: None,
                base_rate: d("2.50"),
                current_reading: None,
                previous_reading: None,
                billed_amount: Some(d(billed)),
                installed_on: None,
                last_reading_on: None,
                next_reading_on: None,
                cut_off_on: None,
                address: None,
                meter: None,
                notes: None,
            },
            &Actor::new("operador"),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn stats_sum_billed_paid_and_pending() {
        let actor = Actor::new("cajero");
        let mut a = service(ServiceType::ALL[0], "100.00");
        a.register_payment(d("40.00"), &actor, Utc::now()).unwrap();
        let b = service(ServiceType::ALL[0], "10.00");

        let s = stats(&[a, b]);
        assert_eq!(s.total, 2);
        assert_eq!(s.billed, d("110.00"));
        assert_eq!(s.paid, d("40.00"));
        assert_eq!(s.pending, d("70.00"));
    }

    #[test]
    fn number_filter_matches_substring() {
        let state = AppState::new();
        let s = service(ServiceType::ALL[0], "1.00");
        let filter = ServiceFilter {
            number: Some("202503".into()),
            ..Default::default()
        };
        assert!(filter.matches(&state, &s));
        let filter = ServiceFilter {
            taxpayer: Some("nadie".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&state, &s));
    }
}
