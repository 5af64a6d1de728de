//! # Personnel API
//!
//! Municipal employees under `/personal`, and the login accounts linked to
//! them. Giving an employee a role provisions a user named
//! `first.last@municipio.local`; the generated password is returned once,
//! in the response that created it.

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use muni_core::{money, validation};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{created, Created};
use crate::audit::{layer, AuditAction};
use crate::auth::{generate_password, hash_password, Access, CallerIdentity, Module};
use crate::error::AppError;
use crate::export::Sheet;
use crate::extractors::{extract_json, paginate, Page, PageParams};
use crate::state::{AppState, DocumentType, Personnel, User};

const MODULE: Module = Module::Personnel;

/// Domain of generated account names.
pub const ACCOUNT_DOMAIN: &str = "municipio.local";

/// Length of generated passwords.
const PASSWORD_LEN: usize = 12;

pub const EXPORT_HEADERS: &[&str] = &[
    "ID",
    "Nombres",
    "Apellidos",
    "Tipo Documento",
    "Documento",
    "Email",
    "Teléfono",
    "Cargo",
    "Departamento",
    "Fecha Ingreso",
    "Salario",
    "Activo",
    "Usuario",
];

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// Request to register or update an employee.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PersonnelRequest {
    pub first_names: String,
    pub last_names: String,
    pub document_type: DocumentType,
    pub document: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub hired_on: Option<NaiveDate>,
    pub salary: Option<Decimal>,
    pub notes: Option<String>,
    pub active: Option<bool>,
    /// Provision a login account holding this role. Creation only.
    pub role_id: Option<Uuid>,
    /// Account name for the provisioned user; generated when absent.
    pub user_email: Option<String>,
    /// Password for the provisioned user; generated when absent.
    pub password: Option<String>,
}

impl PersonnelRequest {
    fn validate(&self) -> Result<(), AppError> {
        validation::require_text("first_names", &self.first_names, 100)?;
        validation::require_text("last_names", &self.last_names, 100)?;
        validation::require_text("document", &self.document, 20)?;
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            validation::require_email("email", email)?;
        }
        validation::limit_optional("phone", self.phone.as_deref(), 20)?;
        validation::limit_optional("address", self.address.as_deref(), 300)?;
        validation::limit_optional("position", self.position.as_deref(), 100)?;
        validation::limit_optional("department", self.department.as_deref(), 100)?;
        validation::limit_optional("notes", self.notes.as_deref(), 1000)?;
        if let Some(salary) = self.salary {
            money::require_non_negative("salary", salary)?;
            money::check_precision("salary", salary, 10, 2)?;
        }
        Ok(())
    }

    fn apply_to(self, p: &mut Personnel, now: DateTime<Utc>) {
        p.first_names = self.first_names.trim().to_string();
        p.last_names = self.last_names.trim().to_string();
        p.document_type = self.document_type;
        p.document = self.document.trim().to_string();
        p.email = self.email;
        p.phone = self.phone;
        p.address = self.address;
        p.position = self.position;
        p.department = self.department;
        p.hired_on = self.hired_on;
        p.salary = self.salary;
        p.notes = self.notes;
        if let Some(active) = self.active {
            p.active = active;
        }
        p.updated_at = now;
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ActiveRequest {
    pub active: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleAssignment {
    pub role_id: Uuid,
}

/// Employee with the linked account summary.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PersonnelView {
    #[serde(flatten)]
    pub personnel: Personnel,
    pub full_name: String,
    pub username: Option<String>,
    pub roles: Vec<String>,
}

impl PersonnelView {
    fn build(state: &AppState, personnel: Personnel) -> Self {
        let user = personnel.user_id.and_then(|id| state.users.get(&id));
        let roles = user
            .as_ref()
            .map(|u| {
                u.role_ids
                    .iter()
                    .filter_map(|id| state.roles.get(id))
                    .map(|r| r.name)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            full_name: personnel.full_name(),
            username: user.map(|u| u.username),
            roles,
            personnel,
        }
    }
}

/// Credentials of a freshly provisioned account. Shown once.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PersonnelCreated {
    #[serde(flatten)]
    pub personnel: PersonnelView,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PersonnelFilter {
    /// Matches names, document, email or position.
    pub term: Option<String>,
    pub active: Option<bool>,
    pub department: Option<String>,
}

impl PersonnelFilter {
    fn matches(&self, p: &Personnel) -> bool {
        self.active.map_or(true, |a| p.active == a)
            && self.department.as_deref().map_or(true, |d| {
                p.department
                    .as_deref()
                    .is_some_and(|pd| pd.eq_ignore_ascii_case(d.trim()))
            })
            && super::matches_term(
                self.term.as_deref(),
                &[
                    p.first_names.as_str(),
                    p.last_names.as_str(),
                    p.document.as_str(),
                    p.email.as_deref().unwrap_or_default(),
                    p.position.as_deref().unwrap_or_default(),
                ],
            )
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PersonnelStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub by_department: BTreeMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/personal", get(list_personnel))
        .route(
            "/personal",
            post(create_personnel).layer(layer(MODULE, AuditAction::Create)),
        )
        .route("/personal/estadisticas", get(personnel_stats))
        .route(
            "/personal/export",
            get(export_personnel).layer(layer(MODULE, AuditAction::Export)),
        )
        .route("/personal/{id}", get(get_personnel))
        .route(
            "/personal/{id}",
            put(update_personnel).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/personal/{id}",
            delete(delete_personnel).layer(layer(MODULE, AuditAction::Delete)),
        )
        .route(
            "/personal/{id}/estado",
            put(set_personnel_active).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/personal/{id}/rol",
            put(assign_role).layer(layer(MODULE, AuditAction::Update)),
        )
        .route(
            "/personal/{id}/rol",
            delete(remove_role).layer(layer(MODULE, AuditAction::Update)),
        )
}

// ---------------------------------------------------------------------------
// Account provisioning
// ---------------------------------------------------------------------------

/// Lowercase ASCII letters of the first word of `name`.
fn account_part(name: &str) -> String {
    name.split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// `first.last@municipio.local`, then `first.last1@…`, `first.last2@…`
/// until `is_taken` rejects none.
pub fn account_name(first_names: &str, last_names: &str, is_taken: impl Fn(&str) -> bool) -> String {
    let mut first = account_part(first_names);
    if first.is_empty() {
        first = "usuario".to_string();
    }
    let last = account_part(last_names);
    let stem = if last.is_empty() {
        first
    } else {
        format!("{first}.{last}")
    };

    let candidate = format!("{stem}@{ACCOUNT_DOMAIN}");
    if !is_taken(&candidate) {
        return candidate;
    }
    (1u32..)
        .map(|n| format!("{stem}{n}@{ACCOUNT_DOMAIN}"))
        .find(|c| !is_taken(c))
        .unwrap_or(candidate)
}

fn account_taken(state: &AppState, name: &str) -> bool {
    state
        .users
        .any(|u| u.username.eq_ignore_ascii_case(name) || u.email.eq_ignore_ascii_case(name))
}

/// Create the login account of an employee. Returns the user and the
/// plain password.
fn provision_user(
    state: &AppState,
    personnel: &Personnel,
    role_ids: Vec<Uuid>,
    email: Option<String>,
    password: Option<String>,
    now: DateTime<Utc>,
) -> Result<(User, String), AppError> {
    let username = match email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()) {
        Some(email) => {
            validation::require_email("user_email", &email)?;
            if account_taken(state, &email) {
                return Err(AppError::Conflict(format!(
                    "a user with email {email} already exists"
                )));
            }
            email
        }
        None => account_name(&personnel.first_names, &personnel.last_names, |n| {
            account_taken(state, n)
        }),
    };
    let password = password
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| generate_password(PASSWORD_LEN));

    let user = User {
        id: Uuid::new_v4(),
        email: username.clone(),
        username,
        password_hash: hash_password(&password),
        active: personnel.active,
        role_ids,
        created_at: now,
    };
    Ok((user, password))
}

fn require_role(state: &AppState, id: Uuid) -> Result<(), AppError> {
    if state.roles.contains(&id) {
        Ok(())
    } else {
        Err(AppError::not_found("role", id))
    }
}

fn document_taken(state: &AppState, document: &str, except: Option<Uuid>) -> bool {
    state
        .personnel
        .any(|p| Some(p.id) != except && p.document.eq_ignore_ascii_case(document.trim()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /personal — Register an employee, optionally with a login account.
#[utoipa::path(
    post,
    path = "/personal",
    request_body = PersonnelRequest,
    responses(
        (status = 201, description = "Employee registered", body = PersonnelCreated),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate document or account", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "personnel"
)]
pub async fn create_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<PersonnelRequest>, JsonRejection>,
) -> Result<Created<PersonnelCreated>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let mut req = extract_json(body)?;
    req.validate()?;
    if document_taken(&state, &req.document, None) {
        return Err(AppError::Conflict(format!(
            "an employee with document {} already exists",
            req.document.trim()
        )));
    }
    if let Some(role_id) = req.role_id {
        require_role(&state, role_id)?;
    }

    let now = Utc::now();
    let role_id = req.role_id.take();
    let user_email = req.user_email.take();
    let password = req.password.take();
    let mut personnel = Personnel {
        id: Uuid::new_v4(),
        user_id: None,
        first_names: String::new(),
        last_names: String::new(),
        document_type: req.document_type,
        document: String::new(),
        email: None,
        phone: None,
        address: None,
        position: None,
        department: None,
        hired_on: None,
        salary: None,
        notes: None,
        active: true,
        created_at: now,
        updated_at: now,
    };
    req.apply_to(&mut personnel, now);

    // A role always provisions an account; explicit credentials alone do too.
    let wants_account = role_id.is_some()
        || (user_email.as_deref().is_some_and(|e| !e.trim().is_empty())
            && password.as_deref().is_some_and(|p| !p.trim().is_empty()));
    let mut credentials = None;
    if wants_account {
        let (user, password) = provision_user(
            &state,
            &personnel,
            role_id.into_iter().collect(),
            user_email,
            password,
            now,
        )?;
        personnel.user_id = Some(user.id);
        state.users.insert(user.id, user.clone());
        state.persist(&user).await?;
        tracing::info!(user = %user.username, "login account provisioned for employee");
        credentials = Some(Credentials {
            username: user.username,
            password,
        });
    }

    state.personnel.insert(personnel.id, personnel.clone());
    state.persist(&personnel).await?;
    tracing::info!(personnel_id = %personnel.id, document = %personnel.document, "employee registered");

    let id = personnel.id;
    Ok(created(
        id,
        PersonnelCreated {
            personnel: PersonnelView::build(&state, personnel),
            credentials,
        },
    ))
}

/// GET /personal — List employees.
#[utoipa::path(
    get,
    path = "/personal",
    params(
        ("term" = Option<String>, Query, description = "Name, document, email or position"),
        ("active" = Option<bool>, Query, description = "Active flag"),
        ("department" = Option<String>, Query, description = "Department"),
    ),
    responses((status = 200, description = "Page of employees", body = serde_json::Value)),
    tag = "personnel"
)]
pub async fn list_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<PageParams>,
    Query(filter): Query<PersonnelFilter>,
) -> Result<Json<Page<PersonnelView>>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let items = state.personnel.filter(|p| filter.matches(p));
    Ok(Json(
        paginate(items, &page).map(|p| PersonnelView::build(&state, p)),
    ))
}

/// GET /personal/{id} — Fetch an employee.
pub async fn get_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PersonnelView>, AppError> {
    caller.require(MODULE, Access::Read)?;
    let personnel = state
        .personnel
        .get(&id)
        .ok_or_else(|| AppError::not_found("personnel", id))?;
    Ok(Json(PersonnelView::build(&state, personnel)))
}

/// PUT /personal/{id} — Replace an employee's details.
#[utoipa::path(
    put,
    path = "/personal/{id}",
    params(("id" = Uuid, Path, description = "Personnel ID")),
    request_body = PersonnelRequest,
    responses(
        (status = 200, description = "Employee updated", body = PersonnelView),
        (status = 404, description = "Employee not found", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate document", body = crate::error::ErrorBody),
    ),
    tag = "personnel"
)]
pub async fn update_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<PersonnelRequest>, JsonRejection>,
) -> Result<Json<PersonnelView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    req.validate()?;
    if document_taken(&state, &req.document, Some(id)) {
        return Err(AppError::Conflict(format!(
            "an employee with document {} already exists",
            req.document.trim()
        )));
    }
    let personnel = state
        .personnel
        .update(&id, |p| req.apply_to(p, Utc::now()))
        .ok_or_else(|| AppError::not_found("personnel", id))?;
    state.persist(&personnel).await?;
    Ok(Json(PersonnelView::build(&state, personnel)))
}

/// PUT /personal/{id}/estado — Activate or deactivate, cascading to the account.
#[utoipa::path(
    put,
    path = "/personal/{id}/estado",
    params(("id" = Uuid, Path, description = "Personnel ID")),
    request_body = ActiveRequest,
    responses(
        (status = 200, description = "Active flag updated", body = PersonnelView),
        (status = 404, description = "Employee not found", body = crate::error::ErrorBody),
    ),
    tag = "personnel"
)]
pub async fn set_personnel_active(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ActiveRequest>, JsonRejection>,
) -> Result<Json<PersonnelView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    let personnel = state
        .personnel
        .update(&id, |p| {
            p.active = req.active;
            p.updated_at = Utc::now();
        })
        .ok_or_else(|| AppError::not_found("personnel", id))?;
    state.persist(&personnel).await?;

    if let Some(user) = personnel
        .user_id
        .and_then(|uid| state.users.update(&uid, |u| u.active = req.active))
    {
        state.persist(&user).await?;
    }
    tracing::info!(personnel_id = %id, active = req.active, "employee active flag changed");
    Ok(Json(PersonnelView::build(&state, personnel)))
}

/// DELETE /personal/{id} — Delete an employee and their account.
#[utoipa::path(
    delete,
    path = "/personal/{id}",
    params(("id" = Uuid, Path, description = "Personnel ID")),
    responses(
        (status = 204, description = "Employee deleted"),
        (status = 404, description = "Employee not found", body = crate::error::ErrorBody),
    ),
    tag = "personnel"
)]
pub async fn delete_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    caller.require(MODULE, Access::Delete)?;
    let personnel = state
        .personnel
        .remove(&id)
        .ok_or_else(|| AppError::not_found("personnel", id))?;
    state.forget::<Personnel>(id).await?;
    if let Some(user_id) = personnel.user_id {
        if state.users.remove(&user_id).is_some() {
            state.forget::<User>(user_id).await?;
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /personal/{id}/rol — Replace the account's roles with one role.
///
/// An employee without an account gets one; its credentials are returned.
#[utoipa::path(
    put,
    path = "/personal/{id}/rol",
    params(("id" = Uuid, Path, description = "Personnel ID")),
    request_body = RoleAssignment,
    responses(
        (status = 200, description = "Role assigned", body = PersonnelCreated),
        (status = 404, description = "Employee or role not found", body = crate::error::ErrorBody),
    ),
    tag = "personnel"
)]
pub async fn assign_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RoleAssignment>, JsonRejection>,
) -> Result<Json<PersonnelCreated>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let req = extract_json(body)?;
    require_role(&state, req.role_id)?;
    let mut personnel = state
        .personnel
        .get(&id)
        .ok_or_else(|| AppError::not_found("personnel", id))?;

    let existing = personnel
        .user_id
        .and_then(|uid| state.users.update(&uid, |u| u.role_ids = vec![req.role_id]));
    let credentials = match existing {
        Some(user) => {
            state.persist(&user).await?;
            None
        }
        None => {
            let now = Utc::now();
            let (user, password) =
                provision_user(&state, &personnel, vec![req.role_id], None, None, now)?;
            state.users.insert(user.id, user.clone());
            state.persist(&user).await?;
            personnel = state
                .personnel
                .update(&id, |p| {
                    p.user_id = Some(user.id);
                    p.updated_at = now;
                })
                .ok_or_else(|| AppError::not_found("personnel", id))?;
            state.persist(&personnel).await?;
            Some(Credentials {
                username: user.username,
                password,
            })
        }
    };
    tracing::info!(personnel_id = %id, role_id = %req.role_id, "role assigned to employee");

    Ok(Json(PersonnelCreated {
        personnel: PersonnelView::build(&state, personnel),
        credentials,
    }))
}

/// DELETE /personal/{id}/rol — Clear the account's roles.
pub async fn remove_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<PersonnelView>, AppError> {
    caller.require(MODULE, Access::Write)?;
    let personnel = state
        .personnel
        .get(&id)
        .ok_or_else(|| AppError::not_found("personnel", id))?;
    if let Some(user) = personnel
        .user_id
        .and_then(|uid| state.users.update(&uid, |u| u.role_ids.clear()))
    {
        state.persist(&user).await?;
    }
    Ok(Json(PersonnelView::build(&state, personnel)))
}

/// GET /personal/estadisticas — Headcount.
#[utoipa::path(
    get,
    path = "/personal/estadisticas",
    responses((status = 200, description = "Headcount", body = PersonnelStats)),
    tag = "personnel"
)]
pub async fn personnel_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<PersonnelStats>, AppError> {
    caller.require(MODULE, Access::Read)?;
    Ok(Json(stats(&state.personnel.list())))
}

fn stats(personnel: &[Personnel]) -> PersonnelStats {
    let active = personnel.iter().filter(|p| p.active).count();
    let mut by_department = BTreeMap::new();
    for p in personnel {
        let department = p
            .department
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| "SIN DEPARTAMENTO".to_string());
        *by_department.entry(department).or_insert(0) += 1;
    }
    PersonnelStats {
        total: personnel.len(),
        active,
        inactive: personnel.len() - active,
        by_department,
    }
}

/// GET /personal/export — Spreadsheet of the filtered staff.
pub async fn export_personnel(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<PersonnelFilter>,
) -> Result<Response, AppError> {
    caller.require(MODULE, Access::Read)?;
    let mut staff = state.personnel.filter(|p| filter.matches(p));
    staff.sort_by(|a, b| a.last_names.cmp(&b.last_names));

    let mut sheet = Sheet::new("Personal", EXPORT_HEADERS);
    for p in staff {
        let username = p.user_id.and_then(|id| state.users.get(&id)).map(|u| u.username);
        sheet.push(vec![
            p.id.to_string().into(),
            p.first_names.into(),
            p.last_names.into(),
            p.document_type.as_str().into(),
            p.document.into(),
            p.email.into(),
            p.phone.into(),
            p.position.into(),
            p.department.into(),
            p.hired_on.into(),
            p.salary.into(),
            p.active.into(),
            username.into(),
        ]);
    }
    sheet.into_response("personal.xlsx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_name_strips_accents_and_counts_collisions() {
        assert_eq!(
            account_name("María José", "Gómez Ruiz", |_| false),
            "mara.gmez@municipio.local"
        );
        let taken = ["ana.perez@municipio.local", "ana.perez1@municipio.local"];
        assert_eq!(
            account_name("Ana", "Perez", |n| taken.contains(&n)),
            "ana.perez2@municipio.local"
        );
        assert_eq!(account_name("", "", |_| false), "usuario@municipio.local");
    }

    #[test]
    fn stats_group_by_department() {
        let now = Utc::now();
        let make = |department: Option<&str>, active: bool| Personnel {
            id: Uuid::new_v4(),
            user_id: None,
            first_names: "Ana".into(),
            last_names: "Pérez".into(),
            document_type: DocumentType::Cc,
            document: Uuid::new_v4().to_string(),
            email: None,
            phone: None,
            address: None,
            position: None,
            department: department.map(str::to_string),
            hired_on: None,
            salary: None,
            notes: None,
            active,
            created_at: now,
            updated_at: now,
        };
        let s = stats(&[
            make(Some("Hacienda"), true),
            make(Some("Hacienda"), false),
            make(None, true),
        ]);
        assert_eq!(s.total, 3);
        assert_eq!(s.active, 2);
        assert_eq!(s.inactive, 1);
        assert_eq!(s.by_department["Hacienda"], 2);
        assert_eq!(s.by_department["SIN DEPARTAMENTO"], 1);
    }

    #[test]
    fn provisioned_user_gets_generated_password() {
        let state = AppState::new();
        let now = Utc::now();
        let p = Personnel {
            id: Uuid::new_v4(),
            user_id: None,
            first_names: "Luis".into(),
            last_names: "Rojas".into(),
            document_type: DocumentType::Ce,
            document: "V-1".into(),
            email: None,
            phone: None,
            address: None,
            position: None,
            department: None,
            hired_on: None,
            salary: None,
            notes: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let (user, password) = provision_user(&state, &p, vec![], None, None, now).unwrap();
        assert_eq!(user.username, "luis.rojas@municipio.local");
        assert_eq!(password.len(), PASSWORD_LEN);
        assert!(crate::auth::verify_password(&password, &user.password_hash));
    }
}
