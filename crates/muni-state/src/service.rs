//! # Utility Service Lifecycle
//!
//! A municipal utility service (water, sewage, gas, ...) contracted by a
//! taxpayer. Metered services are billed by consumption between readings;
//! flat-rate services are billed their base rate.
//!
//! ## States
//!
//! ```text
//! PendingInstallation ──▶ Active ◀──▶ Maintenance
//!                           │  ▲
//!                           ▼  │ (debt cleared)
//!                        Suspended ──cut──▶ CutOff ──(no debt)──▶ Active
//!                           │
//!                           └──(no debt)──▶ Inactive
//! ```
//!
//! Paying off a suspended service brings it back to `Active`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use muni_core::{money, validation, Actor, ValidationError};

use crate::payable::{AuditStamp, Balance, LedgerError, Lifecycle, Payable, TransitionRecord};

/// Status of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Active,
    Suspended,
    CutOff,
    Inactive,
    Maintenance,
    PendingInstallation,
}

impl ServiceStatus {
    /// All statuses, in declaration order.
    pub const ALL: [ServiceStatus; 6] = [
        Self::Active,
        Self::Suspended,
        Self::CutOff,
        Self::Inactive,
        Self::Maintenance,
        Self::PendingInstallation,
    ];

    /// Return the string representation of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::CutOff => "CUT_OFF",
            Self::Inactive => "INACTIVE",
            Self::Maintenance => "MAINTENANCE",
            Self::PendingInstallation => "PENDING_INSTALLATION",
        }
    }

    /// Human-readable label.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Suspended => "Suspended",
            Self::CutOff => "Cut off",
            Self::Inactive => "Inactive",
            Self::Maintenance => "Under maintenance",
            Self::PendingInstallation => "Pending installation",
        }
    }

    pub fn can_bill(&self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }

    pub fn can_be_cut(&self) -> bool {
        matches!(self, Self::Active | Self::Suspended)
    }

    pub fn can_be_reactivated(&self) -> bool {
        matches!(self, Self::Suspended | Self::CutOff | Self::Inactive)
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Active | Self::Maintenance)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of utility service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    DrinkingWater,
    Sewerage,
    StreetCleaning,
    PublicLighting,
    DomesticGas,
    Telephony,
    Internet,
    CableTelevision,
    RoadMaintenance,
    CitizenSecurity,
    FireBrigade,
    Cemetery,
    MunicipalMarket,
    PublicTransport,
    ParksGardens,
    Other,
}

impl ServiceType {
    /// All service types, in catalogue order.
    pub const ALL: [ServiceType; 16] = [
        Self::DrinkingWater,
        Self::Sewerage,
        Self::StreetCleaning,
        Self::PublicLighting,
        Self::DomesticGas,
        Self::Telephony,
        Self::Internet,
        Self::CableTelevision,
        Self::RoadMaintenance,
        Self::CitizenSecurity,
        Self::FireBrigade,
        Self::Cemetery,
        Self::MunicipalMarket,
        Self::PublicTransport,
        Self::ParksGardens,
        Self::Other,
    ];

    /// Return the string representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DrinkingWater => "DRINKING_WATER",
            Self::Sewerage => "SEWERAGE",
            Self::StreetCleaning => "STREET_CLEANING",
            Self::PublicLighting => "PUBLIC_LIGHTING",
            Self::DomesticGas => "DOMESTIC_GAS",
            Self::Telephony => "TELEPHONY",
            Self::Internet => "INTERNET",
            Self::CableTelevision => "CABLE_TELEVISION",
            Self::RoadMaintenance => "ROAD_MAINTENANCE",
            Self::CitizenSecurity => "CITIZEN_SECURITY",
            Self::FireBrigade => "FIRE_BRIGADE",
            Self::Cemetery => "CEMETERY",
            Self::MunicipalMarket => "MUNICIPAL_MARKET",
            Self::PublicTransport => "PUBLIC_TRANSPORT",
            Self::ParksGardens => "PARKS_GARDENS",
            Self::Other => "OTHER",
        }
    }

    /// Human-readable label.
    pub fn description(&self) -> &'static str {
        match self {
            Self::DrinkingWater => "Drinking water",
            Self::Sewerage => "Sewerage",
            Self::StreetCleaning => "Street cleaning",
            Self::PublicLighting => "Public lighting",
            Self::DomesticGas => "Domestic gas",
            Self::Telephony => "Telephony",
            Self::Internet => "Internet",
            Self::CableTelevision => "Cable television",
            Self::RoadMaintenance => "Road maintenance",
            Self::CitizenSecurity => "Citizen security",
            Self::FireBrigade => "Fire brigade",
            Self::Cemetery => "Cemetery",
            Self::MunicipalMarket => "Municipal market",
            Self::PublicTransport => "Public transport",
            Self::ParksGardens => "Parks and gardens",
            Self::Other => "Other services",
        }
    }

    /// Whether consumption is measured with a meter.
    pub fn requires_meter(&self) -> bool {
        matches!(
            self,
            Self::DrinkingWater | Self::DomesticGas | Self::Telephony | Self::Internet
        )
    }

    /// Whether the bill depends on consumption.
    pub fn billed_by_consumption(&self) -> bool {
        self.requires_meter() || *self == Self::CableTelevision
    }

    /// Whether the bill is the base rate regardless of consumption.
    pub fn flat_rate(&self) -> bool {
        !self.billed_by_consumption()
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of a service.
#[derive(Debug, Clone)]
pub struct ServiceDraft {
    pub taxpayer_id: Uuid,
    pub service_type: ServiceType,
    /// Defaults to `Active`.
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

impl ServiceDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        money::require_non_negative("base_rate", self.base_rate)?;
        money::check_precision("base_rate", self.base_rate, 13, 2)?;
        for (field, value) in [
            ("current_reading", self.current_reading),
            ("previous_reading", self.previous_reading),
            ("billed_amount", self.billed_amount),
        ] {
            if let Some(v) = value {
                money::require_non_negative(field, v)?;
            }
        }
        validation::limit_optional("address", self.address.as_deref(), 300)?;
        validation::limit_optional("meter", self.meter.as_deref(), 50)?;
        validation::limit_optional("notes", self.notes.as_deref(), 1000)
    }
}

/// A utility service with its billing state and transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    /// `SRV-{yyyy}-{nnnn}`.
    pub number: String,
    pub taxpayer_id: Uuid,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub base_rate: Decimal,
    pub current_reading: Decimal,
    pub previous_reading: Decimal,
    #[serde(flatten)]
    pub ledger: Balance,
    pub installed_on: Option<NaiveDate>,
    pub last_reading_on: Option<NaiveDate>,
    pub next_reading_on: Option<NaiveDate>,
    pub cut_off_on: Option<NaiveDate>,
    pub address: Option<String>,
    pub meter: Option<String>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub stamp: AuditStamp,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord<ServiceStatus>>,
}

impl Service {
    /// Register a new service. Flat-rate services with nothing billed are
    /// billed their base rate.
    pub fn install(
        id: Uuid,
        number: String,
        draft: ServiceDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        draft.validate()?;
        let mut billed = draft.billed_amount.unwrap_or(Decimal::ZERO);
        if draft.service_type.flat_rate() && billed.is_zero() {
            billed = draft.base_rate;
        }
        Ok(Self {
            id,
            number,
            taxpayer_id: draft.taxpayer_id,
            service_type: draft.service_type,
            status: draft.status.unwrap_or(ServiceStatus::Active),
            base_rate: draft.base_rate,
            current_reading: draft.current_reading.unwrap_or(Decimal::ZERO),
            previous_reading: draft.previous_reading.unwrap_or(Decimal::ZERO),
            ledger: Balance::new(billed),
            installed_on: draft.installed_on,
            last_reading_on: draft.last_reading_on,
            next_reading_on: draft.next_reading_on,
            cut_off_on: draft.cut_off_on,
            address: draft.address,
            meter: draft.meter,
            notes: draft.notes,
            stamp: AuditStamp::new(actor, now),
            transitions: Vec::new(),
        })
    }

    /// Replace the editable fields. Status changes go through
    /// [`Service::change_status`]; the billed amount may not drop below what
    /// has been paid.
    pub fn amend(
        &mut self,
        draft: ServiceDraft,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        draft.validate()?;
        let billed = draft.billed_amount.unwrap_or(self.ledger.amount_due);
        if billed < self.ledger.amount_paid {
            return Err(LedgerError::InvalidAmount {
                reason: format!(
                    "billed amount {billed} is below the {} already paid",
                    self.ledger.amount_paid
                ),
            });
        }
        self.taxpayer_id = draft.taxpayer_id;
        self.service_type = draft.service_type;
        self.base_rate = draft.base_rate;
        if let Some(reading) = draft.current_reading {
            self.current_reading = reading;
        }
        if let Some(reading) = draft.previous_reading {
            self.previous_reading = reading;
        }
        self.ledger.amount_due = billed;
        self.installed_on = draft.installed_on;
        self.last_reading_on = draft.last_reading_on;
        self.next_reading_on = draft.next_reading_on;
        self.cut_off_on = draft.cut_off_on;
        self.address = draft.address;
        self.meter = draft.meter;
        self.notes = draft.notes;
        self.stamp.touch(actor, now);
        Ok(())
    }

    /// Consumption between the last two readings, never negative.
    pub fn consumption(&self) -> Decimal {
        (self.current_reading - self.previous_reading).max(Decimal::ZERO)
    }

    /// Whether any billed amount remains unpaid.
    pub fn has_debt(&self) -> bool {
        self.ledger.balance() > Decimal::ZERO
    }

    /// Whether the cut-off date has passed with debt remaining.
    pub fn is_due_for_cut_off(&self, today: NaiveDate) -> bool {
        self.cut_off_on.is_some_and(|date| today > date) && self.has_debt()
    }

    /// Move to `to`, enforcing the debt and cut-off rules.
    pub fn change_status(
        &mut self,
        to: ServiceStatus,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.status == to {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        match to {
            ServiceStatus::CutOff if !self.status.can_be_cut() => {
                return Err(LedgerError::InvalidTransition {
                    from: self.status.to_string(),
                    to: to.to_string(),
                });
            }
            ServiceStatus::Active if self.status == ServiceStatus::CutOff && self.has_debt() => {
                return Err(self.outstanding());
            }
            ServiceStatus::Inactive if self.has_debt() => return Err(self.outstanding()),
            _ => {}
        }
        if to == ServiceStatus::CutOff {
            self.cut_off_on.get_or_insert(now.date_naive());
        }
        self.transition(to, actor, now);
        Ok(())
    }

    /// Record a new meter reading and bill the consumption since the last one.
    pub fn record_reading(
        &mut self,
        reading: Decimal,
        read_on: NaiveDate,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        if !self.service_type.requires_meter() || !self.status.can_bill() {
            return Err(LedgerError::InvalidState {
                entity: Self::ENTITY,
                status: self.status.to_string(),
                operation: "record a reading on",
            });
        }
        if reading < self.current_reading {
            return Err(ValidationError::OutOfRange {
                field: "reading",
                reason: format!("must not be below the current reading {}", self.current_reading),
            }
            .into());
        }
        self.previous_reading = self.current_reading;
        self.current_reading = reading;
        let charge = money::round_currency(self.consumption() * self.base_rate);
        self.ledger.amount_due += charge;
        self.last_reading_on = Some(read_on);
        self.stamp.touch(actor, now);
        Ok(charge)
    }

    fn outstanding(&self) -> LedgerError {
        LedgerError::OutstandingBalance {
            entity: Self::ENTITY,
            balance: self.ledger.balance(),
        }
    }

    fn transition(&mut self, to: ServiceStatus, actor: &Actor, now: DateTime<Utc>) {
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

impl Lifecycle for Service {
    type Status = ServiceStatus;
    const ENTITY: &'static str = "service";

    fn status(&self) -> ServiceStatus {
        self.status
    }

    fn transitions(&self) -> &[TransitionRecord<ServiceStatus>] {
        &self.transitions
    }

    /// A voided service is `Inactive`, which requires a cleared balance.
    fn void(&mut self, reason: &str, actor: &Actor, now: DateTime<Utc>) -> Result<(), LedgerError> {
        validation::limit_text("reason", reason, 500)?;
        self.change_status(ServiceStatus::Inactive, actor, now)?;
        let reason = reason.trim();
        if !reason.is_empty() {
            if let Some(last) = self.transitions.last_mut() {
                last.reason = Some(reason.to_string());
            }
        }
        Ok(())
    }
}

impl Payable for Service {
    fn ledger(&self) -> &Balance {
        &self.ledger
    }

    fn ledger_mut(&mut self) -> &mut Balance {
        &mut self.ledger
    }

    fn accepts_payment(&self) -> bool {
        self.status.can_bill()
    }

    fn settle(&mut self, actor: &Actor, now: DateTime<Utc>) {
        if self.ledger.is_fully_paid() && self.status == ServiceStatus::Suspended {
            self.transition(ServiceStatus::Active, actor, now);
        } else {
            self.stamp.touch(actor, now);
        }
    }
}
