//! # Overdue Sweep
//!
//! Moves past-due, unpaid fines and levies to `OVERDUE`, acting as the
//! system actor. Driven by the background task in `main`, the
//! `POST /multas/vencidas` and `POST /tasas/vencidas` routes, and the
//! `muni sweep-overdue` command.

use std::time::Duration;

use chrono::{DateTime, Utc};
use muni_core::Actor;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::commit;
use crate::error::AppError;
use crate::state::{AppState, Document, Store};

/// Records moved to `OVERDUE` by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub fines: usize,
    pub levies: usize,
}

/// Sweep fines and levies.
pub async fn sweep_overdue(state: &AppState, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
    let report = SweepReport {
        fines: sweep_fines(state, now).await?,
        levies: sweep_levies(state, now).await?,
    };
    if report.fines + report.levies > 0 {
        tracing::info!(fines = report.fines, levies = report.levies, "overdue sweep completed");
    } else {
        tracing::debug!("overdue sweep found nothing to update");
    }
    Ok(report)
}

/// Sweep PENDING / PARTIALLY_PAID fines past their due date.
pub async fn sweep_fines(state: &AppState, now: DateTime<Utc>) -> Result<usize, AppError> {
    let actor = Actor::system();
    sweep(state, &state.fines, |fine| fine.mark_overdue(&actor, now)).await
}

/// Sweep ACTIVE / PARTIALLY_PAID levies past their due date.
pub async fn sweep_levies(state: &AppState, now: DateTime<Utc>) -> Result<usize, AppError> {
    let actor = Actor::system();
    sweep(state, &state.levies, |levy| levy.mark_overdue(&actor, now)).await
}

async fn sweep<T: Document>(
    state: &AppState,
    store: &Store<T>,
    mark: impl Fn(&mut T) -> bool,
) -> Result<usize, AppError> {
    let mut moved = Vec::new();
    for record in store.list() {
        let id = record.id();
        let changed = store.try_update(&id, |r| {
            if mark(r) {
                Ok(r.clone())
            } else {
                Err(())
            }
        });
        if let Some(Ok(updated)) = changed {
            moved.push(updated);
        }
    }
    for record in &moved {
        state.persist(record).await?;
    }
    Ok(moved.len())
}

/// Run [`sweep_overdue`] every `every`, starting one period after launch.
///
/// Returns `None` when the interval is zero (sweeping disabled).
pub fn spawn_periodic(state: AppState, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::info!("background overdue sweep disabled");
        return None;
    }
    tracing::info!(every_secs = every.as_secs(), "background overdue sweep scheduled");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = commit::scoped(&state, sweep_overdue(&state, Utc::now())).await {
                tracing::error!(error = %e, "background overdue sweep failed");
            }
        }
    }))
}
