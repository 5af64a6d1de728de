//! # Ledger Transactions API
//!
//! Treasury movements under `/transacciones`, numbered `TXN-yyyy-NNNNNNNN`.
//! Only `PROCESSED` and `CONFIRMED` transactions count towards daily
//! totals, the month balance and the period report.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use muni_core::{temporal, Actor, ReferenceKind};
use muni_state::{
    LedgerError, Lifecycle, RelatedEntity, Transaction, TransactionDraft, TransactionKind,
    TransactionStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created, VoidRequest};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::AppState;

const MODULE: Module = Module::Transactions;

/// Number of transactions returned by `/transacciones/recientes`.
const RECENT: usize = 10;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransactionRequest {
    #[schema(value_type = String, example = "INCOME")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub concept: String,
    pub external_reference: Option<String>,
    pub voucher_number: Option<String>,
    pub taxpayer_id: Option<Uuid>,
    #[schema(value_type = Option<Object>)]
    pub related_entity: Option<RelatedEntity>,
    pub transaction_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl From<TransactionRequest> for TransactionDraft {
    fn from(req: TransactionRequest) -> Self {
        Self {
            kind: req.kind,
            amount: req.amount,
            concept: req.concept,
            external_reference: req.external_reference,
            voucher_number: req.voucher_number,
            taxpayer_id: req.taxpayer_id,
            related_entity: req.related_entity,
            transaction_date: req.transaction_date,
            notes: req.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub signed_amount: Decimal,
    pub taxpayer_name: Option<String>,
}

impl TransactionView {
    fn build(state: &AppState, transaction: Transaction) -> Self {
        Self {
            signed_amount: transaction.signed_amount(),
            taxpayer_name: transaction
                .taxpayer_id
                .map(|id| super::taxpayer_name(state, id)),
            transaction,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionFilter {
    pub number: Option<String>,
    pub taxpayer_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
    pub kind: Option<TransactionKind>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl TransactionFilter {
    fn matches(&self, t: &Transaction) -> bool {
        super::matches_term(self.number.as_deref(), &[t.number.as_str()])
            && self.taxpayer_id.map_or(true, |id| t.taxpayer_id == Some(id))
            && self.status.map_or(true, |s| t.status == s)
            && self.kind.map_or(true, |k| t.kind == k)
            && super::within_dates(t.transaction_date.date_naive(), self.from, self.to)
            && self.min_amount.map_or(true, |min| t.amount >= min)
            && self.max_amount.map_or(true, |max| t.amount <= max)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StatusTotal {
    pub count: usize,
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionStats {
    pub total: usize,
    pub by_status: BTreeMap<String, StatusTotal>,
    pub income_today: Decimal,
    pub expense_today: Decimal,
    pub month_balance: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReportLine {
    pub kind: String,
    pub count: usize,
    pub total: Decimal,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/transacciones", get(list_transactions))
        .route(
            "/transacciones",
            post(create_transaction).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/transacciones/recientes", get(recent_transactions))
        .route("/transacciones/estadisticas", get(transaction_stats))
        .route("/transacciones/reporte", get(transaction_report))
        .route("/transacciones/{id}", get(get_transaction))
        .route(
            "/transacciones/{id}",
            put(update_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/transacciones/{id}",
            delete(delete_transaction).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/transacciones/{id}/procesar",
            post(process_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/transacciones/{id}/confirmar",
            post(confirm_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/transacciones/{id}/anular",
            post(void_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/transacciones/{id}/rechazar",
            post(reject_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/transacciones/{id}/revertir",
            post(reverse_transaction).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Taxpayer reference, when given, must resolve.
fn check_taxpayer(state: &AppState, draft: &TransactionDraft) -> Result<(), AppError> {
    if let Some(id) = draft.taxpayer_id {
        super::require_taxpayer(state, id)?;
    }
    Ok(())
}

/// POST /transacciones — Open a transaction.
#[utoipa::path(
    post,
    path = "/transacciones",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction opened", body = serde_json::Value),
        (status = 404, description = "Taxpayer not found", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Created<TransactionView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let draft = TransactionDraft::from(extract_json(body)?);
    draft.validate()?;
    check_taxpayer(&state, &draft)?;

    let now = Utc::now();
    let number = state
        .allocate_reference(ReferenceKind::Transaction, now, |n| {
            state.transactions.any(|t| t.number == n)
        })
        .await?;
    let txn = Transaction::open(Uuid::new_v4(), number, draft, &caller.actor(), now)?;
    state.transactions.insert(txn.id, txn.clone());
    state.persist(&txn).await?;
    tracing::info!(transaction_id = %txn.id, number = %txn.number, kind = %txn.kind, amount = %txn.amount, "transaction opened");

    Ok(created(txn.id, TransactionView::build(&state, txn)))
}

/// GET /transacciones — Search transactions.
#[utoipa::path(
    get,
    path = "/transacciones",
    params(
        ("number" = Option<String>, Query, description = "Number substring"),
        ("taxpayer_id" = Option<Uuid>, Query, description = "Taxpayer"),
        ("status" = Option<String>, Query, description = "Status"),
        ("kind" = Option<String>, Query, description = "Kind"),
        ("from" = Option<NaiveDate>, Query, description = "First transaction date"),
        ("to" = Option<NaiveDate>, Query, description = "Last transaction date"),
        ("min_amount" = Option<String>, Query, description = "Minimum amount"),
        ("max_amount" = Option<String>, Query, description = "Maximum amount"),
    ),
    responses((status = 200, description = "Page of transactions", body = serde_json::Value)),
    tag = "transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<TransactionFilter>,
) -> Result<Json<Page<TransactionView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.transactions.filter(|t| filter.matches(t));
    Ok(Json(
        paginate(items, &page).map(|t| TransactionView::build(&state, t)),
    ))
}

/// GET /transacciones/recientes — Last registered transactions.
pub async fn recent_transactions(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut items = state.transactions.list();
    items.sort_by(|a, b| b.stamp.created_at.cmp(&a.stamp.created_at));
    Ok(Json(
        items
            .into_iter()
            .take(RECENT)
            .map(|t| TransactionView::build(&state, t))
            .collect(),
    ))
}

/// GET /transacciones/{id} — Fetch a transaction.
pub async fn get_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let txn = state
        .transactions
        .get(&id)
        .ok_or_else(|| AppError::not_found("transaction", id))?;
    Ok(Json(TransactionView::build(&state, txn)))
}

/// PUT /transacciones/{id} — Amend a pending transaction.
#[utoipa::path(
    put,
    path = "/transacciones/{id}",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = TransactionRequest,
    responses(
        (status = 200, description = "Transaction amended", body = serde_json::Value),
        (status = 409, description = "Transaction is no longer pending", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn update_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<TransactionRequest>, JsonRejection>,
) -> Result<Json<TransactionView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let draft = TransactionDraft::from(extract_json(body)?);
    check_taxpayer(&state, &draft)?;
    let actor = caller.actor();
    let txn = super::apply(&state.transactions, "transaction", id, |t| {
        t.amend(draft, &actor, Utc::now())
    })?;
    state.persist(&txn).await?;
    Ok(Json(TransactionView::build(&state, txn)))
}

/// DELETE /transacciones/{id} — Delete a pending transaction.
#[utoipa::path(
    delete,
    path = "/transacciones/{id}",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    responses(
        (status = 204, description = "Transaction deleted"),
        (status = 404, description = "Transaction not found", body = crate::error::ErrorBody),
        (status = 409, description = "Transaction is no longer pending", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn delete_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let txn = state
        .transactions
        .get(&id)
        .ok_or_else(|| AppError::not_found("transaction", id))?;
    if !txn.is_editable() {
        return Err(LedgerError::InvalidState {
            entity: Transaction::ENTITY,
            status: txn.status.to_string(),
            operation: "delete",
        }
        .into());
    }
    state.transactions.remove(&id);
    state.forget::<Transaction>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn transition(
    state: &AppState,
    caller: &CallerIdentity,
    id: Uuid,
    op: impl FnOnce(&mut Transaction, &Actor, DateTime<Utc>) -> Result<(), LedgerError>,
) -> Result<Json<TransactionView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let actor = caller.actor();
    let txn = super::apply(&state.transactions, "transaction", id, |t| {
        op(t, &actor, Utc::now())
    })?;
    state.persist(&txn).await?;
    tracing::info!(transaction_id = %id, status = %txn.status, by = %actor.username, "transaction status changed");
    Ok(Json(TransactionView::build(state, txn)))
}

/// POST /transacciones/{id}/procesar — `PENDING → PROCESSED`.
pub async fn process_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    transition(&state, &caller, id, |t, actor, now| t.process(actor, now)).await
}

/// POST /transacciones/{id}/confirmar — `PROCESSED → CONFIRMED`.
pub async fn confirm_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    transition(&state, &caller, id, |t, actor, now| t.confirm(actor, now)).await
}

/// POST /transacciones/{id}/anular — Void with a mandatory reason.
#[utoipa::path(
    post,
    path = "/transacciones/{id}/anular",
    params(("id" = Uuid, Path, description = "Transaction ID")),
    request_body = VoidRequest,
    responses(
        (status = 200, description = "Transaction voided", body = serde_json::Value),
        (status = 409, description = "Already voided, confirmed or reversed", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason", body = crate::error::ErrorBody),
    ),
    tag = "transactions"
)]
pub async fn void_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<VoidRequest>, JsonRejection>,
) -> Result<Json<TransactionView>, AppError> {
    let req = extract_json(body)?;
    transition(&state, &caller, id, |t, actor, now| {
        t.void(req.reason.trim(), actor, now)
    })
    .await
}

/// POST /transacciones/{id}/rechazar — `PENDING → REJECTED`.
pub async fn reject_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    transition(&state, &caller, id, |t, actor, now| t.reject(actor, now)).await
}

/// POST /transacciones/{id}/revertir — `CONFIRMED → REVERSED`.
pub async fn reverse_transaction(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    transition(&state, &caller, id, |t, actor, now| t.reverse(actor, now)).await
}

/// GET /transacciones/estadisticas — Per-status totals and treasury flows.
#[utoipa::path(
    get,
    path = "/transacciones/estadisticas",
    responses((status = 200, description = "Transaction counters", body = TransactionStats)),
    tag = "transactions"
)]
pub async fn transaction_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<TransactionStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.transactions.list(), Utc::now())))
}

fn stats(transactions: &[Transaction], now: DateTime<Utc>) -> TransactionStats {
    let today = super::today(now);
    let mut by_status: BTreeMap<String, StatusTotal> = BTreeMap::new();
    let mut income_today = Decimal::ZERO;
    let mut expense_today = Decimal::ZERO;
    let mut month_balance = Decimal::ZERO;

    for t in transactions {
        let entry = by_status.entry(t.status.as_str().to_string()).or_default();
        entry.count += 1;
        entry.amount += t.amount;

        if !t.status.is_effective() {
            continue;
        }
        let date = t.transaction_date.date_naive();
        if date == today {
            if t.kind.is_income() {
                income_today += t.amount;
            } else if t.kind.is_expense() {
                expense_today += t.amount;
            }
        }
        if temporal::same_month(&t.transaction_date, &now) {
            month_balance += t.signed_amount();
        }
    }

    TransactionStats {
        total: transactions.len(),
        by_status,
        income_today,
        expense_today,
        month_balance,
    }
}

/// GET /transacciones/reporte — Effective transactions grouped by kind.
#[utoipa::path(
    get,
    path = "/transacciones/reporte",
    params(
        ("from" = Option<NaiveDate>, Query, description = "First transaction date"),
        ("to" = Option<NaiveDate>, Query, description = "Last transaction date"),
    ),
    responses((status = 200, description = "Totals per kind, largest first", body = [ReportLine])),
    tag = "transactions"
)]
pub async fn transaction_report(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(params): Query<ReportParams>,
) -> Result<Json<Vec<ReportLine>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(report(&state.transactions.list(), params.from, params.to)))
}

fn report(
    transactions: &[Transaction],
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Vec<ReportLine> {
    let mut groups: BTreeMap<&'static str, (usize, Decimal)> = BTreeMap::new();
    for t in transactions.iter().filter(|t| {
        t.status.is_effective() && super::within_dates(t.transaction_date.date_naive(), from, to)
    }) {
        let entry = groups.entry(t.kind.as_str()).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 += t.amount;
    }
    let mut lines: Vec<ReportLine> = groups
        .into_iter()
        .map(|(kind, (count, total))| ReportLine {
            kind: kind.to_string(),
            count,
            total,
        })
        .collect();
    lines.sort_by(|a, b| b.total.cmp(&a.total));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn txn(kind: TransactionKind, amount: &str, at: DateTime<Utc>) -> Transaction {
        Transaction::open(
            Uuid::new_v4(),
            format!("TXN-2025-{:08}", at.timestamp_subsec_millis()),
            TransactionDraft {
                kind,
                amount: d(amount),
                concept: "Caja".into(),
                external_reference: None,
                voucher_number: None,
                taxpayer_id: None,
                related_entity: None,
                transaction_date: Some(at),
                notes: None,
            },
            &Actor::new("tesorero"),
            at,
        )
        .unwrap()
    }

    fn processed(mut t: Transaction) -> Transaction {
        t.process(&Actor::new("tesorero"), Utc::now()).unwrap();
        t
    }

    #[test]
    fn stats_only_count_effective_flows() {
        let now = Utc::now();
        let rows = vec![
            processed(txn(TransactionKind::Income, "300.00", now)),
            processed(txn(TransactionKind::Expense, "120.00", now)),
            txn(TransactionKind::Income, "999.00", now),
        ];
        let s = stats(&rows, now);
        assert_eq!(s.total, 3);
        assert_eq!(s.income_today, d("300.00"));
        assert_eq!(s.expense_today, d("120.00"));
        assert_eq!(s.month_balance, d("180.00"));
        assert_eq!(s.by_status["PENDING"].amount, d("999.00"));
        assert_eq!(s.by_status["PROCESSED"].count, 2);
    }

    #[test]
    fn report_groups_by_kind_largest_first() {
        let now = Utc::now();
        let rows = vec![
            processed(txn(TransactionKind::FinePayment, "50.00", now)),
            processed(txn(TransactionKind::FinePayment, "25.00", now)),
            processed(txn(TransactionKind::TaxPayment, "500.00", now)),
            txn(TransactionKind::Refund, "10.00", now),
        ];
        let lines = report(&rows, None, None);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, "TAX_PAYMENT");
        assert_eq!(lines[1].count, 2);
        assert_eq!(lines[1].total, d("75.00"));

        let tomorrow = super::super::today(now).succ_opt().unwrap();
        assert!(report(&rows, Some(tomorrow), None).is_empty());
    }

    #[test]
    fn filter_checks_amount_range() {
        let t = txn(TransactionKind::Income, "100.00", Utc::now());
        let filter = TransactionFilter {
            min_amount: Some(d("50")),
            max_amount: Some(d("150")),
            ..Default::default()
        };
        assert!(filter.matches(&t));
        let filter = TransactionFilter {
            min_amount: Some(d("101")),
            ..Default::default()
        };
        assert!(!filter.matches(&t));
    }
}
