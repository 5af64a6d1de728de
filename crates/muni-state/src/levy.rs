//! # Levy Lifecycle
//!
//! A recurring municipal charge (waste collection, public lighting, ...)
//! billed per period to a taxpayer's property or activity.
//!
//! ## States
//!
//! ```text
//! Active ──pay──▶ PartiallyPaid ──pay──▶ Paid
//!    │                 │
//!    └──due passes─────┴──▶ Overdue ──pay──▶ PartiallyPaid / Paid
//!
//! any non-terminal ──change status──▶ Suspended | Exempt | Voided | ...
//! ```
//!
//! `Paid` and `Voided` are terminal for explicit status changes.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muni_core::{money, temporal, validation, Actor, ValidationError};

use crate::payable::{
    append_note, AuditStamp, Balance, LedgerError, Lifecycle, Payable, TransitionRecord,
};

/// Status of a levy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevyStatus {
    Active,
    Suspended,
    Overdue,
    Paid,
    PartiallyPaid,
    Exempt,
    Voided,
}

impl LevyStatus {
    /// All statuses, in declaration order.
    pub const ALL: [LevyStatus; 7] = [
        Self::Active,
        Self::Suspended,
        Self::Overdue,
        Self::Paid,
        Self::PartiallyPaid,
        Self::Exempt,
        Self::Voided,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Overdue => "OVERDUE",
            Self::Paid => "PAID",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::Exempt => "EXEMPT",
            Self::Voided => "VOIDED",
        }
    }

    /// Whether a payment may be registered.
    pub fn accepts_payment(&self) -> bool {
        matches!(self, Self::Active | Self::PartiallyPaid | Self::Overdue)
    }

    /// Whether explicit status changes are closed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Voided)
    }
}

impl std::fmt::Display for LevyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of municipal levy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevyType {
    WasteCollection,
    PublicLighting,
    UrbanOrnament,
    PublicSafety,
    FireService,
    CivilProtection,
    Cemetery,
    MunicipalMarket,
    PublicTransport,
    Environment,
    SportsRecreation,
    Culture,
}

impl LevyType {
    /// All levy types, in catalogue order.
    pub const ALL: [LevyType; 12] = [
        Self::WasteCollection,
        Self::PublicLighting,
        Self::UrbanOrnament,
        Self::PublicSafety,
        Self::FireService,
        Self::CivilProtection,
        Self::Cemetery,
        Self::MunicipalMarket,
        Self::PublicTransport,
        Self::Environment,
        Self::SportsRecreation,
        Self::Culture,
    ];

    /// Return the string representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WasteCollection => "WASTE_COLLECTION",
            Self::PublicLighting => "PUBLIC_LIGHTING",
            Self::UrbanOrnament => "URBAN_ORNAMENT",
            Self::PublicSafety => "PUBLIC_SAFETY",
            Self::FireService => "FIRE_SERVICE",
            Self::CivilProtection => "CIVIL_PROTECTION",
            Self::Cemetery => "CEMETERY",
            Self::MunicipalMarket => "MUNICIPAL_MARKET",
            Self::PublicTransport => "PUBLIC_TRANSPORT",
            Self::Environment => "ENVIRONMENT",
            Self::SportsRecreation => "SPORTS_RECREATION",
            Self::Culture => "CULTURE",
        }
    }
}

impl std::fmt::Display for LevyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a levy is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriod {
    Monthly,
    Bimonthly,
    Quarterly,
    FourMonthly,
    Biannual,
    Annual,
}

impl BillingPeriod {
    /// Length of the period in months.
    pub fn months(&self) -> u32 {
        match self {
            Self::Monthly => 1,
            Self::Bimonthly => 2,
            Self::Quarterly => 3,
            Self::FourMonthly => 4,
            Self::Biannual => 6,
            Self::Annual => 12,
        }
    }

    /// Due date of a period starting on `start`.
    pub fn due_after(&self, start: NaiveDate) -> Option<NaiveDate> {
        start.checked_add_months(Months::new(self.months()))
    }
}

/// Caller-supplied fields of a levy.
#[derive(Debug, Clone)]
pub struct LevyDraft {
    pub taxpayer_id: Uuid,
    pub levy_type: LevyType,
    pub description: String,
    pub amount: Decimal,
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDate,
    /// Defaults to one billing period after `start_date`.
    pub due_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub zone: Option<String>,
    pub property_area: Option<Decimal>,
    pub cadastral_value: Option<Decimal>,
    pub notes: Option<String>,
}

impl LevyDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require_text("description", &self.description, 500)?;
        validation::limit_optional("address", self.address.as_deref(), 300)?;
        validation::limit_optional("zone", self.zone.as_deref(), 100)?;
        validation::limit_optional("notes", self.notes.as_deref(), 1000)?;
        money::require_at_least("amount", self.amount, money::cent())?;
        money::check_precision("amount", self.amount, 13, 2)?;
        if let Some(area) = self.property_area {
            money::require_non_negative("property_area", area)?;
        }
        if let Some(value) = self.cadastral_value {
            money::require_non_negative("cadastral_value", value)?;
        }
        if let Some(due) = self.due_date {
            if due < self.start_date {
                return Err(ValidationError::OutOfRange {
                    field: "due_date",
                    reason: "must not precede the start date".to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolved_due_date(&self) -> Option<NaiveDate> {
        self.due_date
            .or_else(|| self.billing_period.due_after(self.start_date))
    }
}

/// A levy with its payment state and transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Levy {
    pub id: Uuid,
    /// `TAS-{yyyyMM}-{nnnn}`.
    pub number: String,
    pub taxpayer_id: Uuid,
    pub levy_type: LevyType,
    pub description: String,
    #[serde(flatten)]
    pub ledger: Balance,
    pub status: LevyStatus,
    pub billing_period: BillingPeriod,
    pub start_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub paid_at: Option<DateTime<Utc>>,
    pub address: Option<String>,
    pub zone: Option<String>,
    pub property_area: Option<Decimal>,
    pub cadastral_value: Option<Decimal>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub stamp: AuditStamp,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord<LevyStatus>>,
}

impl Levy {
    /// Assess a new levy in `Active`.
    pub fn assess(
        id: Uuid,
        number: String,
        draft: LevyDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        draft.validate()?;
        let due_date = draft.resolved_due_date();
        Ok(Self {
            id,
            number,
            taxpayer_id: draft.taxpayer_id,
            levy_type: draft.levy_type,
            description: draft.description,
            ledger: Balance::new(draft.amount),
            status: LevyStatus::Active,
            billing_period: draft.billing_period,
            start_date: draft.start_date,
            due_date,
            paid_at: None,
            address: draft.address,
            zone: draft.zone,
            property_area: draft.property_area,
            cadastral_value: draft.cadastral_value,
            notes: draft.notes,
            stamp: AuditStamp::new(actor, now),
            transitions: Vec::new(),
        })
    }

    /// Replace the editable fields. Only before any payment has been taken.
    pub fn amend(
        &mut self,
        draft: LevyDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status.is_terminal() || self.ledger.has_payments() {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "edit",
            });
        }
        draft.validate()?;
        self.due_date = draft.resolved_due_date();
        self.taxpayer_id = draft.taxpayer_id;
        self.levy_type = draft.levy_type;
        self.description = draft.description;
        self.ledger.amount_due = draft.amount;
        self.billing_period = draft.billing_period;
        self.start_date = draft.start_date;
        self.address = draft.address;
        self.zone = draft.zone;
        self.property_area = draft.property_area;
        self.cadastral_value = draft.cadastral_value;
        self.notes = draft.notes;
        self.stamp.touch(actor, now);
        Ok(())
    }

    /// Set the status explicitly. `Voided` records a note.
    ///
    /// The payment statuses must agree with the balance: `Paid` only once
    /// nothing is owed, `PartiallyPaid` only with some but not all of it
    /// collected, `Overdue` only while something is owed.
    pub fn change_status(
        &mut self,
        to: LevyStatus,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let consistent = match to {
            LevyStatus::Paid => self.ledger.is_fully_paid(),
            LevyStatus::PartiallyPaid => {
                self.ledger.has_payments() && !self.ledger.is_fully_paid()
            }
            LevyStatus::Overdue => !self.ledger.is_fully_paid(),
            _ => true,
        };
        if self.status.is_terminal() || self.status == to || !consistent {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == LevyStatus::Voided {
            append_note(&mut self.notes, format!("VOIDED - {}", temporal::display(&now)));
        }
        if to == LevyStatus::Paid {
            self.paid_at = Some(now);
        }
        self.transition(to, actor, now);
        Ok(())
    }

    /// Move a past-due levy with a balance to `Overdue`. Returns whether it moved.
    pub fn mark_overdue(&mut self, actor: &Actor, now: DateTime<Utc>) -> bool {
        let sweepable = matches!(self.status, LevyStatus::Active | LevyStatus::PartiallyPaid);
        let past_due = self
            .due_date
            .is_some_and(|due| due < now.date_naive());
        if !sweepable || !past_due || self.ledger.is_fully_paid() {
            return false;
        }
        self.transition(LevyStatus::Overdue, actor, now);
        true
    }

    /// Whether the levy may be deleted: never once paid, and not while a
    /// partially collected balance remains.
    pub fn is_deletable(&self) -> bool {
        if self.status == LevyStatus::Paid {
            return false;
        }
        !(self.ledger.has_payments() && self.ledger.balance() > Decimal::ZERO)
    }

    fn transition(&mut self, to: LevyStatus, actor: &Actor, now: DateTime<Utc>) {
        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            at: now,
            actor: actor.username.clone(),
            reason: None,
        });
        self.status = to;
        self.stamp.touch(actor, now);
    }
}

impl Lifecycle for Levy {
    type Status = LevyStatus;
    const ENTITY: &'static str = "levy";

    fn status(&self) -> LevyStatus {
        self.status
    }

    fn transitions(&self) -> &[TransitionRecord<LevyStatus>] {
        &self.transitions
    }

    /// Void through the explicit status change; a non-blank reason is kept
    /// in the notes and the transition log.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validation::limit_text("reason", reason, 500)?;
        self.change_status(LevyStatus::Voided, actor, now)?;
        let reason = reason.trim();
        if !reason.is_empty() {
            append_note(&mut self.notes, format!("Reason: {reason}"));
            if let Some(last) = self.transitions.last_mut() {
                last.reason = Some(reason.to_string());
            }
        }
        Ok(())
    }
}

impl Payable for Levy {
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
            self.transition(LevyStatus::Paid, actor, now);
        } else if self.status != LevyStatus::PartiallyPaid {
            self.transition(LevyStatus::PartiallyPaid, actor, now);
        } else {
            self.stamp.touch(actor, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 9, 0, 0).unwrap()
    }

    fn draft() -> LevyDraft {
        LevyDraft {
            taxpayer_id: Uuid::new_v4(),
            levy_type: LevyType::WasteCollection,
            description: "Aseo urbano sector centro".to_string(),
            amount: d("250.00"),
            billing_period: BillingPeriod::Quarterly,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            due_date: None,
            address: Some("Av. Bolívar 12".to_string()),
            zone: Some("CENTRO".to_string()),
            property_area: Some(d("120.5")),
            cadastral_value: None,
            notes: None,
        }
    }

    fn make_levy() -> Levy {
        Levy::assess(
            Uuid::new_v4(),
            "TAS-202503-0001".to_string(),
            draft(),
            &Actor::new("recaudador"),
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_levy_is_active_with_derived_due_date() {
        let levy = make_levy();
        assert_eq!(levy.status, LevyStatus::Active);
        assert_eq!(levy.due_date, NaiveDate::from_ymd_opt(2025, 4, 1));
    }

    #[test]
    fn test_billing_period_months() {
        assert_eq!(BillingPeriod::FourMonthly.months(), 4);
        assert_eq!(BillingPeriod::Annual.months(), 12);
    }

    #[test]
    fn test_full_payment_marks_paid() {
        let mut levy = make_levy();
        levy.register_payment(d("250.00"), &Actor::new("cajero"), now())
            .unwrap();
        assert_eq!(levy.status, LevyStatus::Paid);
        assert!(levy.paid_at.is_some());
    }

    #[test]
    fn test_partial_payment() {
        let mut levy = make_levy();
        levy.register_payment(d("100.00"), &Actor::new("cajero"), now())
            .unwrap();
        assert_eq!(levy.status, LevyStatus::PartiallyPaid);
        assert_eq!(levy.balance(), d("150.00"));
    }

    #[test]
    fn test_voided_levy_rejects_payment() {
        let mut levy = make_levy();
        let actor = Actor::new("supervisor");
        levy.change_status(LevyStatus::Voided, &actor, now()).unwrap();
        assert!(levy.notes.as_deref().unwrap().starts_with("VOIDED - 07/03/2025"));
        assert!(matches!(
            levy.register_payment(d("1.00"), &actor, now()),
            Err(LedgerError::NotPayable { .. })
        ));
    }

    #[test]
    fn test_void_keeps_reason() {
        let mut levy = make_levy();
        levy.void("Inmueble demolido", &Actor::new("supervisor"), now())
            .unwrap();
        assert_eq!(levy.status, LevyStatus::Voided);
        assert!(levy.notes.as_deref().unwrap().ends_with("Reason: Inmueble demolido"));
        assert_eq!(
            levy.transitions.last().unwrap().reason.as_deref(),
            Some("Inmueble demolido")
        );
    }

    #[test]
    fn test_exempt_levy_rejects_payment() {
        let mut levy = make_levy();
        let actor = Actor::new("supervisor");
        levy.change_status(LevyStatus::Exempt, &actor, now()).unwrap();
        assert!(levy.register_payment(d("1.00"), &actor, now()).is_err());
    }

    #[test]
    fn test_no_status_change_out_of_terminal() {
        let mut levy = make_levy();
        let actor = Actor::new("supervisor");
        levy.change_status(LevyStatus::Voided, &actor, now()).unwrap();
        assert!(matches!(
            levy.change_status(LevyStatus::Active, &actor, now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_paid_status_requires_settled_balance() {
        let mut levy = make_levy();
        let actor = Actor::new("supervisor");
        assert!(matches!(
            levy.change_status(LevyStatus::Paid, &actor, now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert_eq!(levy.status, LevyStatus::Active);
        assert!(levy.paid_at.is_none());
        assert_eq!(levy.balance(), d("250.00"));
    }

    #[test]
    fn test_partially_paid_status_requires_partial_collection() {
        let mut levy = make_levy();
        let actor = Actor::new("supervisor");
        assert!(matches!(
            levy.change_status(LevyStatus::PartiallyPaid, &actor, now()),
            Err(LedgerError::InvalidTransition { .. })
        ));

        levy.register_payment(d("100.00"), &actor, now()).unwrap();
        levy.change_status(LevyStatus::Suspended, &actor, now()).unwrap();
        levy.change_status(LevyStatus::PartiallyPaid, &actor, now()).unwrap();
        assert_eq!(levy.status, LevyStatus::PartiallyPaid);
        assert!(matches!(
            levy.change_status(LevyStatus::Paid, &actor, now()),
            Err(LedgerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_amend_blocked_after_payment() {
        let mut levy = make_levy();
        let actor = Actor::new("cajero");
        levy.register_payment(d("10.00"), &actor, now()).unwrap();
        assert!(levy.amend(draft(), &actor, now()).is_err());
    }

    #[test]
    fn test_deletable_rules() {
        let mut levy = make_levy();
        assert!(levy.is_deletable());
        let actor = Actor::new("cajero");
        levy.register_payment(d("10.00"), &actor, now()).unwrap();
        assert!(!levy.is_deletable());
        levy.register_payment(d("240.00"), &actor, now()).unwrap();
        assert!(!levy.is_deletable());
    }

    #[test]
    fn test_overdue_sweep() {
        let mut levy = make_levy();
        let system = Actor::system();
        assert!(!levy.mark_overdue(&system, now()));
        let later = Utc.with_ymd_and_hms(2025, 4, 2, 0, 0, 0).unwrap();
        assert!(levy.mark_overdue(&system, later));
        assert_eq!(levy.status, LevyStatus::Overdue);
        assert_eq!(levy.transitions.last().unwrap().actor, "SISTEMA");
    }
}
