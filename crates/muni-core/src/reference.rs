//! # Reference Numbers
//!
//! Human-facing numbers for fines, levies, utility services, and ledger
//! transactions:
//!
//! ```text
//! MUL-{yyyyMM}-{nnnn}     fine, per-month counter
//! TAS-{yyyyMM}-{nnnn}     levy, per-month counter
//! SRV-{yyyy}-{nnnn}       service, per-year counter
//! TXN-{yyyy}-{8 digits}   transaction, epoch-millis suffix, "-nnn" on collision
//! ```
//!
//! ## Concurrency
//!
//! Candidate generation, the probe against existing records, and the counter
//! advance all happen under one mutex. The counter never moves backwards, so
//! a number handed to one caller is never handed to another in the same
//! process, even if the first caller has not stored its record yet.
//! Cross-process uniqueness is the database's job (unique constraint plus a
//! bounded retry in the API layer).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ReferenceError;

/// Highest per-period sequence value for counter-based kinds.
const MAX_SEQUENCE: u32 = 9_999;

/// Highest collision suffix for transaction numbers.
const MAX_COLLISION_SUFFIX: u32 = 999;

/// The kind of record a reference number identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    Fine,
    Levy,
    Service,
    Transaction,
}

impl ReferenceKind {
    /// Three-letter prefix of the number.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Fine => "MUL",
            Self::Levy => "TAS",
            Self::Service => "SRV",
            Self::Transaction => "TXN",
        }
    }

    /// Period component for an instant.
    pub fn period(&self, at: &DateTime<Utc>) -> String {
        match self {
            Self::Fine | Self::Levy => at.format("%Y%m").to_string(),
            Self::Service | Self::Transaction => at.format("%Y").to_string(),
        }
    }

    /// Return the string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fine => "FINE",
            Self::Levy => "LEVY",
            Self::Service => "SERVICE",
            Self::Transaction => "TRANSACTION",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct SequenceState {
    counters: HashMap<(ReferenceKind, String), u32>,
    /// Last transaction base number issued and the next collision suffix to try.
    last_transaction: Option<(String, u32)>,
}

/// Thread-safe, cloneable reference-number generator.
///
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSequence {
    state: Arc<Mutex<SequenceState>>,
}

impl ReferenceSequence {
    /// Create a generator with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw the next free number of `kind` for the period containing `at`.
    ///
    /// `is_taken` is consulted for every candidate so numbers already present
    /// in a store (for example after hydration from the database) are skipped.
    pub fn next(
        &self,
        kind: ReferenceKind,
        at: DateTime<Utc>,
        is_taken: impl Fn(&str) -> bool,
    ) -> Result<String, ReferenceError> {
        let period = kind.period(&at);
        let mut state = self.state.lock();

        if kind == ReferenceKind::Transaction {
            return next_transaction(&mut state, &period, &at, is_taken);
        }

        let counter = state.counters.entry((kind, period.clone())).or_insert(0);
        while *counter < MAX_SEQUENCE {
            *counter += 1;
            let candidate = format!("{}-{}-{:04}", kind.prefix(), period, counter);
            if !is_taken(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ReferenceError::Exhausted {
            prefix: kind.prefix(),
            period,
        })
    }
}

fn next_transaction(
    state: &mut SequenceState,
    period: &str,
    at: &DateTime<Utc>,
    is_taken: impl Fn(&str) -> bool,
) -> Result<String, ReferenceError> {
    let millis = at.timestamp_millis().rem_euclid(100_000_000);
    let base = format!("TXN-{period}-{millis:08}");

    let mut next_suffix = match &state.last_transaction {
        Some((last, next)) if *last == base => *next,
        _ => 0,
    };

    if next_suffix == 0 {
        next_suffix = 1;
        if !is_taken(&base) {
            state.last_transaction = Some((base.clone(), next_suffix));
            return Ok(base);
        }
    }

    while next_suffix <= MAX_COLLISION_SUFFIX {
        let candidate = format!("{base}-{next_suffix:03}");
        next_suffix += 1;
        if !is_taken(&candidate) {
            state.last_transaction = Some((base, next_suffix));
            return Ok(candidate);
        }
    }
    Err(ReferenceError::Exhausted {
        prefix: ReferenceKind::Transaction.prefix(),
        period: period.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn march_2025() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 10, 0, 0).unwrap()
    }

    #[test]
    fn fine_numbers_are_monthly() {
        let seq = ReferenceSequence::new();
        let first = seq.next(ReferenceKind::Fine, march_2025(), |_| false).unwrap();
        let second = seq.next(ReferenceKind::Fine, march_2025(), |_| false).unwrap();
        assert_eq!(first, "MUL-202503-0001");
        assert_eq!(second, "MUL-202503-0002");

        let april = Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap();
        let next_month = seq.next(ReferenceKind::Fine, april, |_| false).unwrap();
        assert_eq!(next_month, "MUL-202504-0001");
    }

    #[test]
    fn service_numbers_are_yearly() {
        let seq = ReferenceSequence::new();
        let n = seq.next(ReferenceKind::Service, march_2025(), |_| false).unwrap();
        assert_eq!(n, "SRV-2025-0001");
    }

    #[test]
    fn taken_numbers_are_skipped() {
        let seq = ReferenceSequence::new();
        let taken: HashSet<&str> = ["TAS-202503-0001", "TAS-202503-0002"].into_iter().collect();
        let n = seq
            .next(ReferenceKind::Levy, march_2025(), |c| taken.contains(c))
            .unwrap();
        assert_eq!(n, "TAS-202503-0003");
    }

    #[test]
    fn transaction_collisions_get_suffixes() {
        let seq = ReferenceSequence::new();
        let at = march_2025();
        let a = seq.next(ReferenceKind::Transaction, at, |_| false).unwrap();
        let b = seq.next(ReferenceKind::Transaction, at, |_| false).unwrap();
        let c = seq.next(ReferenceKind::Transaction, at, |_| false).unwrap();
        assert!(a.starts_with("TXN-2025-"));
        assert_eq!(a.len(), "TXN-2025-".len() + 8);
        assert_eq!(b, format!("{a}-001"));
        assert_eq!(c, format!("{a}-002"));
    }

    #[test]
    fn exhausted_period_is_an_error() {
        let seq = ReferenceSequence::new();
        let err = seq
            .next(ReferenceKind::Fine, march_2025(), |_| true)
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Exhausted { prefix: "MUL", .. }));
    }

    #[test]
    fn concurrent_draws_are_distinct() {
        let seq = ReferenceSequence::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = seq.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| seq.next(ReferenceKind::Fine, march_2025(), |_| false).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for number in handle.join().unwrap() {
                assert!(all.insert(number), "duplicate reference number");
            }
        }
        assert_eq!(all.len(), 400);
    }
}
