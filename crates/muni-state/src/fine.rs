//! # Fine Lifecycle
//!
//! A one-time penalty imposed on a taxpayer for an infraction.
//!
//! ## States
//!
//! ```text
//! Pending ──pay──▶ PartiallyPaid ──pay──▶ Paid
//!    │                  │
//!    └──due passes──────┴──▶ Overdue ──pay──▶ PartiallyPaid / Paid
//!
//! any state except Paid ──void──▶ Voided
//! ```
//!
//! `Prescribed` and `UnderAppeal` are set administratively and neither
//! accepts payments nor edits.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muni_core::{money, temporal, validation, Actor, ValidationError};

use crate::payable::{
    append_note, AuditStamp, Balance, LedgerError, Lifecycle, Payable, TransitionRecord,
};

// ─── Status ──────────────────────────────────────────────────────────

/// Status of a fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FineStatus {
    /// Issued, nothing paid.
    Pending,
    /// Fully paid.
    Paid,
    /// Some amount collected, balance remains.
    PartiallyPaid,
    /// Due date passed with a balance remaining.
    Overdue,
    /// Collection right has lapsed.
    Prescribed,
    /// Cancelled.
    Voided,
    /// Contested by the taxpayer.
    UnderAppeal,
}

impl FineStatus {
    /// All statuses, in declaration order.
    pub const ALL: [FineStatus; 7] = [
        Self::Pending,
        Self::Paid,
        Self::PartiallyPaid,
        Self::Overdue,
        Self::Prescribed,
        Self::Voided,
        Self::UnderAppeal,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::Overdue => "OVERDUE",
            Self::Prescribed => "PRESCRIBED",
            Self::Voided => "VOIDED",
            Self::UnderAppeal => "UNDER_APPEAL",
        }
    }

    /// Whether a payment may be registered.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, Self::Pending | Self::PartiallyPaid | Self::Overdue)
    }

    /// Whether the fine's details may still be edited.
    pub fn is_editable(&self) -> bool {
        self.accepts_payment()
    }
}

impl std::fmt::Display for FineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Infraction catalogue ────────────────────────────────────────────

/// Kind of infraction a fine punishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfractionType {
    LateDeclaration,
    LatePayment,
    TaxEvasion,
    ForgedDocuments,
    MissingDeclaration,
    IgnoredSummons,
    AuditObstruction,
    IncorrectBookkeeping,
    ExpiredBusinessLicense,
    UnpermittedConstruction,
    ImproperLandUse,
    Other,
}

impl InfractionType {
    /// All infraction types, in catalogue order.
    pub const ALL: [InfractionType; 12] = [
        Self::LateDeclaration,
        Self::LatePayment,
        Self::TaxEvasion,
        Self::ForgedDocuments,
        Self::MissingDeclaration,
        Self::IgnoredSummons,
        Self::AuditObstruction,
        Self::IncorrectBookkeeping,
        Self::ExpiredBusinessLicense,
        Self::UnpermittedConstruction,
        Self::ImproperLandUse,
        Self::Other,
    ];

    /// Return the string representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LateDeclaration => "LATE_DECLARATION",
            Self::LatePayment => "LATE_PAYMENT",
            Self::TaxEvasion => "TAX_EVASION",
            Self::ForgedDocuments => "FORGED_DOCUMENTS",
            Self::MissingDeclaration => "MISSING_DECLARATION",
            Self::IgnoredSummons => "IGNORED_SUMMONS",
            Self::AuditObstruction => "AUDIT_OBSTRUCTION",
            Self::IncorrectBookkeeping => "INCORRECT_BOOKKEEPING",
            Self::ExpiredBusinessLicense => "EXPIRED_BUSINESS_LICENSE",
            Self::UnpermittedConstruction => "UNPERMITTED_CONSTRUCTION",
            Self::ImproperLandUse => "IMPROPER_LAND_USE",
            Self::Other => "OTHER",
        }
    }

    /// Human-readable label.
    pub fn description(&self) -> &'static str {
        match self {
            Self::LateDeclaration => "Declaration filed after the deadline",
            Self::LatePayment => "Payment made after the deadline",
            Self::TaxEvasion => "Tax evasion",
            Self::ForgedDocuments => "Forged or altered documents",
            Self::MissingDeclaration => "Declaration not filed",
            Self::IgnoredSummons => "Summons not complied with",
            Self::AuditObstruction => "Obstruction of a tax audit",
            Self::IncorrectBookkeeping => "Incorrect bookkeeping of operations",
            Self::ExpiredBusinessLicense => "Expired business licence",
            Self::UnpermittedConstruction => "Construction without permit",
            Self::ImproperLandUse => "Improper land use",
            Self::Other => "Other infractions",
        }
    }

    /// One-based position in the catalogue.
    pub fn ordinal(&self) -> usize {
        Self::ALL
            .iter()
            .position(|t| t == self)
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Short code: first three letters of the name plus the ordinal, e.g. `LAT01`.
    pub fn code(&self) -> String {
        let prefix: String = self.as_str().chars().take(3).collect();
        format!("{prefix}{:02}", self.ordinal())
    }
}

impl std::fmt::Display for InfractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Draft ───────────────────────────────────────────────────────────

/// Caller-supplied fields of a fine, used for issue and amend.
#[derive(Debug, Clone)]
pub struct FineDraft {
    pub taxpayer_id: Uuid,
    pub infraction: InfractionType,
    pub description: String,
    pub amount: Decimal,
    pub infraction_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
}

impl FineDraft {
    /// Field rules shared by issue and amend.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require_text("description", &self.description, 500)?;
        validation::limit_optional("notes", self.notes.as_deref(), 1000)?;
        money::require_at_least("amount", self.amount, money::cent())?;
        money::check_precision("amount", self.amount, 13, 2)?;
        if self.due_date <= self.infraction_date {
            return Err(ValidationError::OutOfRange {
                field: "due_date",
                reason: "must be after the infraction date".to_string(),
            });
        }
        Ok(())
    }
}

// ─── Fine ────────────────────────────────────────────────────────────

/// A fine with its payment state and transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fine {
    pub id: Uuid,
    /// `MUL-{yyyyMM}-{nnnn}`.
    pub number: String,
    pub taxpayer_id: Uuid,
    pub infraction: InfractionType,
    pub description: String,
    #[serde(flatten)]
    pub ledger: Balance,
    pub status: FineStatus,
    pub infraction_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub stamp: AuditStamp,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord<FineStatus>>,
}

impl Fine {
    /// Issue a new fine in `Pending`.
    pub fn issue(
        id: Uuid,
        number: String,
        draft: FineDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        draft.validate()?;
        Ok(Self {
            id,
            number,
            taxpayer_id: draft.taxpayer_id,
            infraction: draft.infraction,
            description: draft.description,
            ledger: Balance::new(draft.amount),
            status: FineStatus::Pending,
            infraction_date: draft.infraction_date,
            due_date: draft.due_date,
            paid_at: None,
            notes: draft.notes,
            stamp: AuditStamp::new(actor, now),
            transitions: Vec::new(),
        })
    }

    /// Replace the editable fields.
    ///
    /// Only allowed while the fine still accepts payments. The new amount
    /// may not drop below what has already been collected.
    pub fn amend(
        &mut self,
        draft: FineDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if !self.status.is_editable() {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "edit",
            });
        }
        draft.validate()?;
        if draft.amount < self.ledger.amount_paid {
            return Err(LedgerError::InvalidAmount {
                reason: format!(
                    "amount {} is below the {} already paid",
                    draft.amount, self.ledger.amount_paid
                ),
            });
        }
        self.taxpayer_id = draft.taxpayer_id;
        self.infraction = draft.infraction;
        self.description = draft.description;
        self.ledger.amount_due = draft.amount;
        self.infraction_date = draft.infraction_date;
        self.due_date = draft.due_date;
        self.notes = draft.notes;
        self.stamp.touch(actor, now);
        Ok(())
    }

    /// Move a past-due, unpaid fine to `Overdue`. Returns whether it moved.
    pub fn mark_overdue(&mut self, actor: &Actor, now: DateTime<Utc>) -> bool {
        let sweepable = matches!(self.status, FineStatus::Pending | FineStatus::PartiallyPaid);
        if !sweepable || self.due_date >= now || self.ledger.is_fully_paid() {
            return false;
        }
        self.transition(FineStatus::Overdue, actor, now, None);
        true
    }

    /// Whether the due date has passed and a balance remains.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.due_date && !self.ledger.is_fully_paid()
    }

    /// Days past the due date, 0 when not overdue.
    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        if self.ledger.is_fully_paid() {
            return 0;
        }
        temporal::days_overdue(self.due_date.date_naive(), today)
    }

    fn transition(
        &mut self,
        to: FineStatus,
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

impl Lifecycle for Fine {
    type Status = FineStatus;
    const ENTITY: &'static str = "fine";

    fn status(&self) -> FineStatus {
        self.status
    }

    fn transitions(&self) -> &[TransitionRecord<FineStatus>] {
        &self.transitions
    }

    /// Void the fine, appending the reason to the notes. Paid fines stay paid.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validation::require_text("reason", reason, 500)?;
        if matches!(self.status, FineStatus::Paid | FineStatus::Voided) {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "void",
            });
        }
        append_note(
            &mut self.notes,
            format!("VOIDED: {reason} - {}", temporal::display(&now)),
        );
        self.transition(FineStatus::Voided, actor, now, Some(reason.to_string()));
        Ok(())
    }
}

impl Payable for Fine {
    fn ledger(&self) -> &Balance {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut Balance {
        &mut self.ledger
    }

    fn accepts_payment(&self) -> bool {
        self.status.accepts_payment()
    }

    fn settle(&mut self, actor: &Actor, now: DateTime<Utc>) {
        if self.ledger.is_fully_paid() {
            self.paid_at = Some(now);
            self.transition(FineStatus::Paid, actor, now, None);
        } else if self.status != FineStatus::PartiallyPaid {
            self.transition(FineStatus::PartiallyPaid, actor, now, None);
        } else {
            self.stamp.touch(actor, now);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
