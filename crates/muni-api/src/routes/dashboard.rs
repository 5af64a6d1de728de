//! # Dashboard API
//!
//! `GET /dashboard`: record counts per module and what the caller may see.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Dashboard {
    pub username: String,
    /// Record count per module name. Modules the caller cannot read are
    /// omitted.
    pub counts: BTreeMap<String, usize>,
    /// READ access per module name.
    pub access: BTreeMap<String, bool>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

fn count(state: &AppState, module: Module) -> Option<usize> {
    let n = match module {
        Module::Taxpayers => state.taxpayers.len(),
        Module::Taxes => state.taxes.len(),
        Module::Declarations => state.declarations.len(),
        Module::Withholdings => state.withholdings.len(),
        Module::Vouchers => state.vouchers.len(),
        Module::Fines => state.fines.len(),
        Module::Levies => state.levies.len(),
        Module::Payments => state.payments.len(),
        Module::Services => state.services.len(),
        Module::Transactions => state.transactions.len(),
        Module::Personnel => state.personnel.len(),
        Module::Roles => state.roles.len(),
        Module::Audit => state.audit_log.len(),
        Module::Dashboard => return None,
    };
    Some(n)
}

/// GET /dashboard — Module counters and the caller's access map.
#[utoipa::path(
    get,
    path = "/dashboard",
    responses((status = 200, description = "Counters and access map", body = Dashboard)),
    tag = "dashboard"
)]
pub async fn dashboard(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Dashboard>, AppError> {
    caller.require(Module::Dashboard, Access::Read)?;
    let counts = Module::ALL
        .into_iter()
        .filter(|m| caller.can(*m, Access::Read))
        .filter_map(|m| count(&state, m).map(|n| (m.key().to_string(), n)))
        .collect();
    let access = caller
        .access_map()
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    Ok(Json(Dashboard {
        username: caller.username,
        counts,
        access,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_data_module_is_counted() {
        let state = AppState::new();
        for m in Module::ALL {
            assert_eq!(count(&state, m).is_none(), m == Module::Dashboard);
        }
        // The administrator role is seeded on start.
        assert_eq!(count(&state, Module::Roles), Some(1));
    }
}
