//! # Shared Receivable Contract
//!
//! Fines, levies and utility services all carry an amount due, an amount
//! paid, and a status that decides whether the record still accepts money.
//! [`Payable`] captures that shape once so payment registration, balance
//! arithmetic, and status recomputation are written a single time.
//!
//! ## Payment registration
//!
//! ```text
//! amount ≤ 0 or amount > balance  ──▶ InvalidAmount
//! status does not accept payment  ──▶ NotPayable
//! otherwise                       ──▶ amount_paid += amount, settle status
//! ```
//!
//! Amount checks run first: a fully paid record has a zero balance, so any
//! further payment is reported as an amount problem rather than a state one.
//! A rejected payment leaves the record untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use muni_core::{Actor, ValidationError};

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors raised by lifecycle operations on financial records.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// The record's status does not accept a payment.
    #[error("{entity} in status {status} does not accept payments")]
    NotPayable {
        /// Entity name, e.g. "fine".
        entity: &'static str,
        /// Current status.
        status: String,
    },

    /// The operation is not allowed in the record's current status.
    #[error("cannot {operation} a {entity} in status {status}")]
    InvalidState {
        /// Entity name, e.g. "fine".
        entity: &'static str,
        /// Current status.
        status: String,
        /// Operation attempted, e.g. "void".
        operation: &'static str,
    },

    /// The payment amount is not positive or exceeds the balance.
    #[error("invalid amount: {reason}")]
    InvalidAmount {
        /// Why the amount was refused.
        reason: String,
    },

    /// The requested status change is not part of the lifecycle.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The operation requires the record to carry no debt.
    #[error("{entity} still has an outstanding balance of {balance}")]
    OutstandingBalance {
        /// Entity name.
        entity: &'static str,
        /// Remaining balance.
        balance: Decimal,
    },

    /// A field failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// ─── Balance ─────────────────────────────────────────────────────────

/// Amount due and amount paid of a receivable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Amount billed.
    pub amount_due: Decimal,
    /// Amount collected so far. Never exceeds `amount_due`.
    pub amount_paid: Decimal,
}

impl Balance {
    /// A fresh balance with nothing paid.
    pub fn new(amount_due: Decimal) -> Self {
        Self {
            amount_due,
            amount_paid: Decimal::ZERO,
        }
    }

    /// `amount_due - amount_paid`.
    pub fn balance(&self) -> Decimal {
        self.amount_due - self.amount_paid
    }

    /// Whether everything due has been collected.
    pub fn is_fully_paid(&self) -> bool {
        self.amount_paid >= self.amount_due
    }

    /// Whether anything has been collected.
    pub fn has_payments(&self) -> bool {
        self.amount_paid > Decimal::ZERO
    }

    /// Check a payment amount against the remaining balance.
    pub fn check_payment(&self, amount: Decimal) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                reason: "payment must be greater than 0".to_string(),
            });
        }
        let balance = self.balance();
        if amount > balance {
            return Err(LedgerError::InvalidAmount {
                reason: format!("payment {amount} exceeds the outstanding balance {balance}"),
            });
        }
        Ok(())
    }
}

// ─── Audit stamp ─────────────────────────────────────────────────────

/// Who created and last modified a record, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStamp {
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Creating user.
    pub created_by: String,
    /// Last modification instant.
    pub modified_at: Option<DateTime<Utc>>,
    /// Last modifying user.
    pub modified_by: Option<String>,
}

impl AuditStamp {
    /// Stamp a record created by `actor` at `at`.
    pub fn new(actor: &Actor, at: DateTime<Utc>) -> Self {
        Self {
            created_at: at,
            created_by: actor.username.clone(),
            modified_at: None,
            modified_by: None,
        }
    }

    /// Record a modification.
    pub fn touch(&mut self, actor: &Actor, at: DateTime<Utc>) {
        self.modified_at = Some(at);
        self.modified_by = Some(actor.username.clone());
    }
}

// ─── Transition log ──────────────────────────────────────────────────

/// One status change of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord<S> {
    /// Status before the change.
    pub from: S,
    /// Status after the change.
    pub to: S,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// Who made the change.
    pub actor: String,
    /// Free-text reason, when one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ─── Traits ──────────────────────────────────────────────────────────

/// A record with a status and a transition history.
pub trait Lifecycle {
    /// Status enum of the record.
    type Status: Copy + Eq + std::fmt::Display;

    /// Lower-case entity name used in error messages.
    const ENTITY: &'static str;

    /// Current status.
    fn status(&self) -> Self::Status;

    /// Ordered log of status changes.
    fn transitions(&self) -> &[TransitionRecord<Self::Status>];

    /// Cancel the record, moving it to its void status.
    ///
    /// Records that demand a justification reject a blank `reason`.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError>;
}

/// A receivable that accepts partial payments until its balance is zero.
pub trait Payable: Lifecycle {
    /// Amounts of the record.
    fn ledger(&self) -> &Balance;

    /// Mutable amounts of the record.
    fn ledger_mut(&mut self) -> &mut Balance;

    /// Whether the current status accepts a payment.
    fn accepts_payment(&self) -> bool;

    /// Recompute status and stamps after `amount_paid` has grown.
    fn settle(&mut self, actor: &Actor, now: DateTime<Utc>);

    /// Amount still owed.
    fn balance(&self) -> Decimal {
        self.ledger().balance()
    }

    /// Whether nothing is owed any more.
    fn is_fully_paid(&self) -> bool {
        self.ledger().is_fully_paid()
    }

    /// Apply a payment and return the remaining balance.
    fn register_payment(
        &mut self,
        amount: Decimal,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        self.ledger().check_payment(amount)?;
        if !self.accepts_payment() {
            return Err(LedgerError::NotPayable {
                entity: Self::ENTITY,
                status: self.status().to_string(),
            });
        }
        self.ledger_mut().amount_paid += amount;
        self.settle(actor, now);
        Ok(self.balance())
    }
}

/// Append a line to optional free-text notes.
pub(crate) fn append_note(notes: &mut Option<String>, line: String) {
    *notes = Some(match notes.take() {
        Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
        _ => line,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_balance_arithmetic() {
        let mut b = Balance::new(d("100.00"));
        assert_eq!(b.balance(), d("100.00"));
        assert!(!b.is_fully_paid());
        b.amount_paid = d("100.00");
        assert!(b.is_fully_paid());
        assert_eq!(b.balance(), Decimal::ZERO);
    }

    #[test]
    fn test_check_payment_rejects_zero_and_overpayment() {
        let b = Balance::new(d("50.00"));
        assert!(matches!(
            b.check_payment(Decimal::ZERO),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            b.check_payment(d("50.01")),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(b.check_payment(d("50.00")).is_ok());
    }

    #[test]
    fn test_append_note() {
        let mut notes = None;
        append_note(&mut notes, "first".to_string());
        append_note(&mut notes, "second".to_string());
        assert_eq!(notes.as_deref(), Some("first\nsecond"));
    }

    #[test]
    fn test_touch_sets_modifier() {
        let now = Utc::now();
        let mut stamp = AuditStamp::new(&Actor::new("ana"), now);
        assert!(stamp.modified_by.is_none());
        stamp.touch(&Actor::new("luis"), now);
        assert_eq!(stamp.modified_by.as_deref(), Some("luis"));
        assert_eq!(stamp.created_by, "ana");
    }
}
