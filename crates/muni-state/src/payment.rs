//! # Payment Lifecycle
//!
//! Money received from a taxpayer, optionally linked to a declaration or a
//! fine.
//!
//! ## States
//!
//! ```text
//! Pending ──process──▶ Processed ──confirm──▶ Confirmed ──refund──▶ Refunded
//!    │                     │
//!    ├──reject─────────────┴──▶ Rejected
//!    │
//! any except Confirmed ──void──▶ Voided
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muni_core::{money, validation, Actor, ValidationError};

use crate::payable::{AuditStamp, LedgerError, Lifecycle, TransitionRecord};

/// Status of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processed,
    Confirmed,
    Rejected,
    Voided,
    Refunded,
}

impl PaymentStatus {
    /// All statuses, in declaration order.
    pub const ALL: [PaymentStatus; 6] = [
        Self::Pending,
        Self::Processed,
        Self::Confirmed,
        Self::Rejected,
        Self::Voided,
        Self::Refunded,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Confirmed => "CONFIRMED",
            Self::Rejected => "REJECTED",
            Self::Voided => "VOIDED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the money was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    CreditCard,
    DebitCard,
    MobilePayment,
    Check,
    Deposit,
}

impl PaymentMethod {
    /// Return the string representation of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "CASH",
            Self::Transfer => "TRANSFER",
            Self::CreditCard => "CREDIT_CARD",
            Self::DebitCard => "DEBIT_CARD",
            Self::MobilePayment => "MOBILE_PAYMENT",
            Self::Check => "CHECK",
            Self::Deposit => "DEPOSIT",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of a payment.
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub taxpayer_id: Uuid,
    pub declaration_id: Option<Uuid>,
    pub fine_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    /// Defaults to the recording instant.
    pub paid_at: Option<DateTime<Utc>>,
    pub concept: String,
    pub receipt_path: Option<String>,
}

impl PaymentDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require_text("concept", &self.concept, 200)?;
        validation::limit_optional("reference", self.reference.as_deref(), 100)?;
        validation::limit_optional("receipt_path", self.receipt_path.as_deref(), 500)?;
        money::require_at_least("amount", self.amount, money::cent())?;
        money::check_precision("amount", self.amount, 13, 2)
    }

    /// The reference with surrounding blanks removed, `None` when blank.
    pub fn normalized_reference(&self) -> Option<String> {
        self.reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    }
}

/// A payment with its transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub taxpayer_id: Uuid,
    pub declaration_id: Option<Uuid>,
    pub fine_id: Option<Uuid>,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub status: PaymentStatus,
    pub paid_at: DateTime<Utc>,
    pub concept: String,
    pub receipt_path: Option<String>,
    #[serde(flatten)]
    pub stamp: AuditStamp,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord<PaymentStatus>>,
}

impl Payment {
    /// Record a new payment in `Pending`.
    pub fn record(
        id: Uuid,
        draft: PaymentDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        draft.validate()?;
        let reference = draft.normalized_reference();
        Ok(Self {
            id,
            taxpayer_id: draft.taxpayer_id,
            declaration_id: draft.declaration_id,
            fine_id: draft.fine_id,
            amount: draft.amount,
            method: draft.method,
            reference,
            status: PaymentStatus::Pending,
            paid_at: draft.paid_at.unwrap_or(now),
            concept: draft.concept,
            receipt_path: draft.receipt_path,
            stamp: AuditStamp::new(actor, now),
            transitions: Vec::new(),
        })
    }

    /// Replace the editable fields. Confirmed payments are frozen.
    pub fn amend(
        &mut self,
        draft: PaymentDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status == PaymentStatus::Confirmed {
            return Err(self.invalid("edit"));
        }
        draft.validate()?;
        self.reference = draft.normalized_reference();
        self.taxpayer_id = draft.taxpayer_id;
        self.declaration_id = draft.declaration_id;
        self.fine_id = draft.fine_id;
        self.amount = draft.amount;
        self.method = draft.method;
        if let Some(paid_at) = draft.paid_at {
            self.paid_at = paid_at;
        }
        self.concept = draft.concept;
        self.receipt_path = draft.receipt_path;
        self.stamp.touch(actor, now);
        Ok(())
    }

    /// `Pending → Processed`.
    pub fn process(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require(PaymentStatus::Pending, PaymentStatus::Processed)?;
        self.transition(PaymentStatus::Processed, actor, now);
        Ok(())
    }

    /// `Processed → Confirmed`.
    pub fn confirm(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require(PaymentStatus::Processed, PaymentStatus::Confirmed)?;
        self.transition(PaymentStatus::Confirmed, actor, now);
        Ok(())
    }

    /// `Pending | Processed → Rejected`.
    pub fn reject(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if !matches!(self.status, PaymentStatus::Pending | PaymentStatus::Processed) {
            return Err(self.invalid("reject"));
        }
        self.transition(PaymentStatus::Rejected, actor, now);
        Ok(())
    }

    /// `Confirmed → Refunded`.
    pub fn refund(&mut self, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        self.require(PaymentStatus::Confirmed, PaymentStatus::Refunded)?;
        self.transition(PaymentStatus::Refunded, actor, now);
        Ok(())
    }

    /// Whether this payment still claims its reference for uniqueness.
    pub fn holds_reference(&self) -> bool {
        self.status != PaymentStatus::Voided && self.reference.is_some()
    }

    fn require(&self, expected: PaymentStatus, to: PaymentStatus) -> Result<(), LedgerError> {
        if self.status != expected {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    fn invalid(&self, operation: &'static str) -> LedgerError {
        LedgerError::InvalidState {
            entity: Self::ENTITY,
            status: self.status.to_string(),
            operation,
        }
    }

    fn transition(&mut self, to: PaymentStatus, actor: &Actor, now: DateTime<Utc>) {
        self.transition_with_reason(to, actor, now, None);
    }

    fn transition_with_reason(
        &mut self,
        to: PaymentStatus,
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

impl Lifecycle for Payment {
    type Status = PaymentStatus;
    const ENTITY: &'static str = "payment";

    fn status(&self) -> PaymentStatus {
        self.status
    }

    fn transitions(&self) -> &[TransitionRecord<PaymentStatus>] {
        &self.transitions
    }

    /// Void any payment that is not confirmed or already voided.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validation::limit_text("reason", reason, 500)?;
        if matches!(self.status, PaymentStatus::Confirmed | PaymentStatus::Voided) {
            return Err(self.invalid("void"));
        }
        let reason = Some(reason.trim().to_string()).filter(|r| !r.is_empty());
        self.transition_with_reason(PaymentStatus::Voided, actor, now, reason);
        Ok(())
    }
}
