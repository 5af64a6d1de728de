//! # muni-core — Foundational Types for the Municipal Tax Back Office
//!
//! Every other crate in the workspace depends on `muni-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Explicit actors.** Every state-changing operation receives an
//!    [`Actor`] argument. There is no ambient "current user".
//!
//! 2. **Decimal money.** Amounts are [`rust_decimal::Decimal`], never floats.
//!    Rounding goes through [`money::round_currency`] (half-up, 2 places).
//!
//! 3. **Race-free reference numbers.** [`ReferenceSequence`] draws fine, levy,
//!    service, and transaction numbers under a single lock, so two concurrent
//!    creations in the same process can never be handed the same number.
//!
//! 4. **Structured validation.** Field-level failures are
//!    [`ValidationError`] values carrying the field name, not bare strings.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `muni-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod actor;
pub mod error;
pub mod money;
pub mod reference;
pub mod temporal;
pub mod validation;

// Re-export primary types for ergonomic imports.
pub use actor::{Actor, SYSTEM_ACTOR};
pub use error::{ReferenceError, ValidationError};
pub use reference::{ReferenceKind, ReferenceSequence};
pub use rust_decimal::Decimal;
