//! # Ledger Transaction Lifecycle
//!
//! ## States
//!
//! ```text
//! Pending ──process──▶ Processed ──confirm──▶ Confirmed ──reverse──▶ Reversed
//!    │
//!    └──reject──▶ Rejected          any except Voided ──void──▶ Voided
//! ```
//!
//! `Processing` is accepted as an intermediate state when hydrating older
//! records; it behaves like `Pending` for processing and rejection.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muni_core::{money, validation, Actor, ValidationError};

use crate::payable::{AuditStamp, LedgerError, Lifecycle, TransitionRecord};

/// Status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Processed,
    Confirmed,
    Voided,
    Rejected,
    Reversed,
}

impl TransactionStatus {
    /// All statuses, in declaration order.
    pub const ALL: [TransactionStatus; 7] = [
        Self::Pending,
        Self::Processing,
        Self::Processed,
        Self::Confirmed,
        Self::Voided,
        Self::Rejected,
        Self::Reversed,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Confirmed => "CONFIRMED",
            Self::Voided => "VOIDED",
            Self::Rejected => "REJECTED",
            Self::Reversed => "REVERSED",
        }
    }

    /// Whether the transaction counts towards balances.
    pub fn is_effective(&self) -> bool {
        matches!(self, Self::Processed | Self::Confirmed)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
    Adjustment,
    ServicePayment,
    TaxPayment,
    LevyPayment,
    FinePayment,
    Refund,
    Commission,
    Interest,
    Discount,
}

impl TransactionKind {
    /// All kinds, in catalogue order.
    pub const ALL: [TransactionKind; 12] = [
        Self::Income,
        Self::Expense,
        Self::Transfer,
        Self::Adjustment,
        Self::ServicePayment,
        Self::TaxPayment,
        Self::LevyPayment,
        Self::FinePayment,
        Self::Refund,
        Self::Commission,
        Self::Interest,
        Self::Discount,
    ];

    /// Return the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "INCOME",
            Self::Expense => "EXPENSE",
            Self::Transfer => "TRANSFER",
            Self::Adjustment => "ADJUSTMENT",
            Self::ServicePayment => "SERVICE_PAYMENT",
            Self::TaxPayment => "TAX_PAYMENT",
            Self::LevyPayment => "LEVY_PAYMENT",
            Self::FinePayment => "FINE_PAYMENT",
            Self::Refund => "REFUND",
            Self::Commission => "COMMISSION",
            Self::Interest => "INTEREST",
            Self::Discount => "DISCOUNT",
        }
    }

    /// Money flowing into the treasury.
    pub fn is_income(&self) -> bool {
        matches!(
            self,
            Self::Income
                | Self::ServicePayment
                | Self::TaxPayment
                | Self::LevyPayment
                | Self::FinePayment
                | Self::Interest
        )
    }

    /// Money flowing out of the treasury.
    pub fn is_expense(&self) -> bool {
        matches!(
            self,
            Self::Expense | Self::Refund | Self::Commission | Self::Discount
        )
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record a transaction refers to, e.g. `("FINE", <uuid>)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub kind: String,
    pub id: Uuid,
}

/// Caller-supplied fields of a transaction.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub concept: String,
    pub external_reference: Option<String>,
    pub voucher_number: Option<String>,
    pub taxpayer_id: Option<Uuid>,
    pub related_entity: Option<RelatedEntity>,
    /// Defaults to the recording instant.
    pub transaction_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl TransactionDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require_text("concept", &self.concept, 500)?;
        validation::limit_optional("external_reference", self.external_reference.as_deref(), 100)?;
        validation::limit_optional("voucher_number", self.voucher_number.as_deref(), 50)?;
        validation::limit_optional("notes", self.notes.as_deref(), 1000)?;
        if let Some(related) = &self.related_entity {
            validation::require_text("related_entity.kind", &related.kind, 50)?;
        }
        money::require_positive("amount", self.amount)?;
        money::check_precision("amount", self.amount, 13, 2)
    }
}

/// A ledger transaction with its transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    /// `TXN-{yyyy}-{8 digits}` with an optional `-nnn` suffix.
    pub number: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub concept: String,
    pub external_reference: Option<String>,
    pub voucher_number: Option<String>,
    pub taxpayer_id: Option<Uuid>,
    pub related_entity: Option<RelatedEntity>,
    pub transaction_date: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub processed_by: Option<String>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub stamp: AuditStamp,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord<TransactionStatus>>,
}

impl Transaction {
    /// Open a new transaction in `Pending`.
    pub fn open(
        id: Uuid,
        number: String,
        draft: TransactionDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        draft.validate()?;
        Ok(Self {
            id,
            number,
            kind: draft.kind,
            status: TransactionStatus::Pending,
            amount: draft.amount,
            concept: draft.concept,
            external_reference: draft.external_reference,
            voucher_number: draft.voucher_number,
            taxpayer_id: draft.taxpayer_id,
            related_entity: draft.related_entity,
            transaction_date: draft.transaction_date.unwrap_or(now),
            processed_at: None,
            confirmed_at: None,
            processed_by: None,
            notes: draft.notes,
            stamp: AuditStamp::new(actor, now),
            transitions: Vec::new(),
        })
    }

    /// Whether edits and deletion are still allowed.
    pub fn is_editable(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    /// Replace the editable fields of a pending transaction.
    pub fn amend(
        &mut self,
        draft: TransactionDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if !self.is_editable() {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "edit",
            });
        }
        draft.validate()?;
        self.kind = draft.kind;
        self.amount = draft.amount;
        self.concept = draft.concept;
        self.external_reference = draft.external_reference;
        self.voucher_number = draft.voucher_number;
        self.taxpayer_id = draft.taxpayer_id;
        self.related_entity = draft.related_entity;
        if let Some(date) = draft.transaction_date {
            self.transaction_date = date;
        }
        self.notes = draft.notes;
        self.stamp.touch(actor, now);
        Ok(())
    }

    /// `Pending | Processing → Processed`.
    pub fn process(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require_any(
            &[TransactionStatus::Pending, TransactionStatus::Processing],
            TransactionStatus::Processed,
        )?;
        self.processed_at = Some(now);
        self.processed_by = Some(actor.username.clone());
        self.transition(TransactionStatus::Processed, actor, now, None);
        Ok(())
    }

    /// `Processed → Confirmed`.
    pub fn confirm(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require_any(&[TransactionStatus::Processed], TransactionStatus::Confirmed)?;
        self.confirmed_at = Some(now);
        self.transition(TransactionStatus::Confirmed, actor, now, None);
        Ok(())
    }

    /// `Pending | Processing → Rejected`.
    pub fn reject(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require_any(
            &[TransactionStatus::Pending, TransactionStatus::Processing],
            TransactionStatus::Rejected,
        )?;
        self.transition(TransactionStatus::Rejected, actor, now, None);
        Ok(())
    }

    /// `Confirmed → Reversed`.
    pub fn reverse(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require_any(&[TransactionStatus::Confirmed], TransactionStatus::Reversed)?;
        self.transition(TransactionStatus::Reversed, actor, now, None);
        Ok(())
    }

    /// Signed contribution to the treasury balance.
    pub fn signed_amount(&self) -> Decimal {
        if self.kind.is_expense() {
            -self.amount
        } else if self.kind.is_income() {
            self.amount
        } else {
            Decimal::ZERO
        }
    }

    fn require_any(
        &self,
        allowed: &[TransactionStatus],
        to: TransactionStatus,
    ) -> Result<(), LedgerError> {
        if !allowed.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn transition(
        &mut self,
        to: TransactionStatus,
        actor: &Actor,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) {
        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            at: now,
            actor: actor.username.clone(),
            reason,
        });
        self.status = to;
        self.stamp.touch(actor, now);
    }
}

impl Lifecycle for Transaction {
    type Status = TransactionStatus;
    const ENTITY: &'static str = "transaction";

    fn status(&self) -> TransactionStatus {
        self.status
    }

    fn transitions(&self) -> &[TransitionRecord<TransactionStatus>] {
        &self.transitions
    }

    /// Void a transaction that never settled, appending the reason to the
    /// notes. Confirmed transactions are reversed instead.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validation::require_text("reason", reason, 500)?;
        if matches!(
            self.status,
            TransactionStatus::Voided | TransactionStatus::Confirmed | TransactionStatus::Reversed
        ) {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "void",
            });
        }
        let suffix = format!(" | Voided: {reason}");
        self.notes = Some(match self.notes.take() {
            Some(notes) => notes + &suffix,
            None => suffix.trim_start_matches(" | ").to_string(),
        });
        self.transition(TransactionStatus::Voided, actor, now, Some(reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(kind: TransactionKind) -> TransactionDraft {
        TransactionDraft {
            kind,
            amount: "500.00".parse().unwrap(),
            concept: "Recaudación diaria".to_string(),
            external_reference: None,
            voucher_number: None,
            taxpayer_id: None,
            related_entity: None,
            transaction_date: None,
            notes: None,
        }
    }

    fn make_txn(kind: TransactionKind) -> Transaction {
        Transaction::open(
            Uuid::new_v4(),
            "TXN-2025-12345678".to_string(),
            draft(kind),
            &Actor::new("tesorero"),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_transaction_is_pending_and_editable() {
        let t = make_txn(TransactionKind::Income);
        assert_eq!(t.status, TransactionStatus::Pending);
        assert!(t.is_editable());
    }

    #[test]
    fn test_process_confirm_reverse() {
        let mut t = make_txn(TransactionKind::Income);
        let actor = Actor::new("tesorero");
        t.process(&actor, Utc::now()).unwrap();
        assert_eq!(t.processed_by.as_deref(), Some("tesorero"));
        assert!(!t.is_editable());
        t.confirm(&actor, Utc::now()).unwrap();
        assert!(t.confirmed_at.is_some());
        t.reverse(&actor, Utc::now()).unwrap();
        assert_eq!(t.status, TransactionStatus::Reversed);
    }

    #[test]
    fn test_cannot_confirm_pending() {
        let mut t = make_txn(TransactionKind::Income);
        assert!(t.confirm(&Actor::new("x"), Utc::now()).is_err());
    }

    #[test]
    fn test_reject_only_from_pending() {
        let mut t = make_txn(TransactionKind::Expense);
        let actor = Actor::new("x");
        t.process(&actor, Utc::now()).unwrap();
        assert!(t.reject(&actor, Utc::now()).is_err());
    }

    #[test]
    fn test_void_appends_reason() {
        let mut t = make_txn(TransactionKind::Income);
        let actor = Actor::new("x");
        t.notes = Some("Caja 1".to_string());
        t.void("duplicada", &actor, Utc::now()).unwrap();
        assert_eq!(t.notes.as_deref(), Some("Caja 1 | Voided: duplicada"));
        assert!(t.void("otra vez", &actor, Utc::now()).is_err());
    }

    #[test]
    fn test_confirmed_transaction_cannot_be_voided() {
        let mut t = make_txn(TransactionKind::Income);
        let actor = Actor::new("tesorero");
        t.process(&actor, Utc::now()).unwrap();
        t.confirm(&actor, Utc::now()).unwrap();
        assert!(matches!(
            t.void("oops", &actor, Utc::now()),
            Err(LedgerError::InvalidState { .. })
        ));
        assert_eq!(t.status, TransactionStatus::Confirmed);
        assert!(t.notes.is_none());

        t.reverse(&actor, Utc::now()).unwrap();
        assert!(t.void("oops", &actor, Utc::now()).is_err());
        assert_eq!(t.status, TransactionStatus::Reversed);
    }

    #[test]
    fn test_processed_transaction_can_be_voided() {
        let mut t = make_txn(TransactionKind::Expense);
        let actor = Actor::new("tesorero");
        t.process(&actor, Utc::now()).unwrap();
        t.void("monto errado", &actor, Utc::now()).unwrap();
        assert_eq!(t.status, TransactionStatus::Voided);
    }

    #[test]
    fn test_void_without_notes() {
        let mut t = make_txn(TransactionKind::Income);
        t.void("error", &Actor::new("x"), Utc::now()).unwrap();
        assert_eq!(t.notes.as_deref(), Some("Voided: error"));
    }

    #[test]
    fn test_amend_only_pending() {
        let mut t = make_txn(TransactionKind::Income);
        let actor = Actor::new("x");
        t.amend(draft(TransactionKind::Expense), &actor, Utc::now()).unwrap();
        assert_eq!(t.kind, TransactionKind::Expense);
        t.process(&actor, Utc::now()).unwrap();
        assert!(t.amend(draft(TransactionKind::Income), &actor, Utc::now()).is_err());
    }

    #[test]
    fn test_signed_amount() {
        assert!(make_txn(TransactionKind::Refund).signed_amount() < Decimal::ZERO);
        assert!(make_txn(TransactionKind::FinePayment).signed_amount() > Decimal::ZERO);
        assert_eq!(make_txn(TransactionKind::Transfer).signed_amount(), Decimal::ZERO);
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut d = draft(TransactionKind::Income);
        d.amount = Decimal::ZERO;
        assert!(Transaction::open(Uuid::new_v4(), "TXN".into(), d, &Actor::new("x"), Utc::now()).is_err());
    }
}
