//! # Roles API
//!
//! Named permission sets under `/roles`. Permission keys must come from the
//! catalogue served at `GET /roles/permisos`.

use std::collections::BTreeSet;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use muni_core::validation;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created};
use crate::audit::{layer, AuditAction};
use crate::auth::{Access, CallerIdentity, Module, Permission};
use crate::error::AppError;
use crate::extractors::extract_json;
use crate::state::{AppState, Role};

const MODULE: Module = Module::Roles;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRequest {
    pub name: String,
    pub description: Option<String>,
    /// Omitted on update keeps the current set.
    pub permissions: Option<BTreeSet<String>>,
}

impl RoleRequest {
    fn validate(&self, state: &AppState) -> Result<(), AppError> {
        validation::require_text("name", &self.name, 100)?;
        validation::limit_optional("description", self.description.as_deref(), 255)?;
        if let Some(permissions) = &self.permissions {
            check_permissions(state, permissions)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionsRequest {
    pub permissions: BTreeSet<String>,
}

/// Role with the number of users holding it.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleView {
    #[serde(flatten)]
    pub role: Role,
    pub users: usize,
}

impl RoleView {
    fn build(state: &AppState, role: Role) -> Self {
        Self {
            users: holders(state, role.id),
            role,
        }
    }
}

fn holders(state: &AppState, role_id: Uuid) -> usize {
    state.users.filter(|u| u.role_ids.contains(&role_id)).len()
}

fn check_permissions(state: &AppState, keys: &BTreeSet<String>) -> Result<(), AppError> {
    let unknown: Vec<&str> = keys
        .iter()
        .filter(|k| !state.is_known_permission(k))
        .map(String::as_str)
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "unknown permissions: {}",
            unknown.join(", ")
        )))
    }
}

fn name_taken(state: &AppState, name: &str, except: Option<Uuid>) -> bool {
    state
        .roles
        .any(|r| Some(r.id) != except && r.name.eq_ignore_ascii_case(name.trim()))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/roles", get(list_roles))
        .route(
            "/roles",
            post(create_role).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/roles/permisos", get(list_permissions))
        .route("/roles/{id}", get(get_role))
        .route(
            "/roles/{id}",
            put(update_role).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/roles/{id}",
            delete(delete_role).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/roles/{id}/permisos",
            put(set_permissions).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /roles — All roles by name.
pub async fn list_roles(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<RoleView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut roles = state.roles.list();
    roles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(
        roles
            .into_iter()
            .map(|r| RoleView::build(&state, r))
            .collect(),
    ))
}

/// GET /roles/permisos — Permission catalogue.
#[utoipa::path(
    get,
    path = "/roles/permisos",
    responses((status = 200, description = "Every module × level permission", body = [Permission])),
    tag = "roles"
)]
pub async fn list_permissions(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<Permission>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(state.permissions.to_vec()))
}

/// GET /roles/{id} — Fetch a role.
pub async fn get_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<RoleView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let role = state
        .roles
        .get(&id)
        .ok_or_else(|| AppError::not_found("role", id))?;
    Ok(Json(RoleView::build(&state, role)))
}

/// POST /roles — Create a role.
#[utoipa::path(
    post,
    path = "/roles",
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleView),
        (status = 409, description = "Duplicate name", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown permission", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub async fn create_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Created<RoleView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate(&state)?;
    if name_taken(&state, &req.name, None) {
        return Err(AppError::Conflict(format!(
            "a role named {} already exists",
            req.name.trim()
        )));
    }

    let now = Utc::now();
    let role = Role {
        id: Uuid::new_v4(),
        name: req.name.trim().to_string(),
        description: req.description,
        permissions: req.permissions.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    state.roles.insert(role.id, role.clone());
    state.persist(&role).await?;
    tracing::info!(role = %role.name, permissions = role.permissions.len(), "role created");
    Ok(created(role.id, RoleView::build(&state, role)))
}

/// PUT /roles/{id} — Rename or redescribe a role.
#[utoipa::path(
    put,
    path = "/roles/{id}",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleView),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate name", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub async fn update_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RoleRequest>, JsonRejection>,
) -> Result<Json<RoleView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate(&state)?;
    if name_taken(&state, &req.name, Some(id)) {
        return Err(AppError::Conflict(format!(
            "a role named {} already exists",
            req.name.trim()
        )));
    }
    let role = state
        .roles
        .update(&id, |r| {
            r.name = req.name.trim().to_string();
            r.description = req.description;
            if let Some(permissions) = req.permissions {
                r.permissions = permissions;
            }
            r.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("role", id))?;
    state.persist(&role).await?;
    Ok(Json(RoleView::build(&state, role)))
}

/// PUT /roles/{id}/permisos — Replace the permission set.
#[utoipa::path(
    put,
    path = "/roles/{id}/permisos",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = PermissionsRequest,
    responses(
        (status = 200, description = "Permissions replaced", body = RoleView),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown permission", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub async fn set_permissions(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PermissionsRequest>, JsonRejection>,
) -> Result<Json<RoleView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    check_permissions(&state, &req.permissions)?;
    let role = state
        .roles
        .update(&id, |r| {
            r.permissions = req.permissions;
            r.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("role", id))?;
    state.persist(&role).await?;
    tracing::info!(role = %role.name, permissions = role.permissions.len(), "role permissions replaced");
    Ok(Json(RoleView::build(&state, role)))
}

/// DELETE /roles/{id} — Delete a role no user holds.
#[utoipa::path(
    delete,
    path = "/roles/{id}",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "Role still assigned", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
pub async fn delete_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let role = state
        .roles
        .get(&id)
        .ok_or_else(|| AppError::not_found("role", id))?;
    let users = holders(&state, id);
    if users > 0 {
        return Err(AppError::Conflict(format!(
            "role {} is still assigned to {users} user(s)",
            role.name
        )));
    }
    state.roles.remove(&id);
    state.forget::<Role>(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_permission_keys_are_rejected() {
        let state = AppState::new();
        let ok: BTreeSet<String> = ["MULTAS_WRITE".to_string()].into();
        assert!(check_permissions(&state, &ok).is_ok());
        let bad: BTreeSet<String> = ["MULTAS_WRITE".to_string(), "NAVE_ESPACIAL".to_string()].into();
        let err = check_permissions(&state, &bad).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("NAVE_ESPACIAL")));
    }

    #[test]
    fn seeded_admin_role_name_is_taken() {
        let state = AppState::new();
        assert!(name_taken(&state, "administrador", None));
        assert!(!name_taken(&state, "Cajero", None));
    }
}
