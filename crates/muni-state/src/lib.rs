//! # muni-state — Financial Lifecycle State Machines
//!
//! Status machines for the receivables and ledger records of the municipal
//! back office. Every operation takes the acting [`muni_core::Actor`] and the
//! current instant explicitly; nothing here reads a clock or a session.
//!
//! ## State Machines
//!
//! - **Fine** (`fine.rs`): `Pending → PartiallyPaid → Paid`, with `Overdue`,
//!   `Voided`, `Prescribed` and `UnderAppeal`.
//!
//! - **Levy** (`levy.rs`): `Active → PartiallyPaid → Paid`, with explicit
//!   status changes and an overdue sweep.
//!
//! - **Payment** (`payment.rs`): `Pending → Processed → Confirmed`, with
//!   `Rejected`, `Voided` and `Refunded` branches.
//!
//! - **Service** (`service.rs`): utility service operation states with
//!   debt-aware cut-off and reactivation rules, plus meter readings.
//!
//! - **Transaction** (`transaction.rs`): ledger movements
//!   `Pending → Processed → Confirmed → Reversed`.
//!
//! ## Shared contract
//!
//! [`Lifecycle`] exposes status and transition history for every record.
//! [`Payable`] adds balance arithmetic and payment registration for the
//! three receivables (fines, levies, services), so the payment rules are
//! written once.

pub mod fine;
pub mod levy;
pub mod payable;
pub mod payment;
pub mod service;
pub mod transaction;

pub use payable::{AuditStamp, Balance, LedgerError, Lifecycle, Payable, TransitionRecord};

pub use fine::{Fine, FineDraft, FineStatus, InfractionType};
pub use levy::{BillingPeriod, Levy, LevyDraft, LevyStatus, LevyType};
pub use payment::{Payment, PaymentDraft, PaymentMethod, PaymentStatus};
pub use service::{Service, ServiceDraft, ServiceStatus, ServiceType};
pub use transaction::{
    RelatedEntity, Transaction, TransactionDraft, TransactionKind, TransactionStatus,
};
