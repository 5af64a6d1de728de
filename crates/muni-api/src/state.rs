//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! - **Registry records** owned by this crate: taxpayers, taxes,
//!   declarations, withholdings, vouchers, personnel, users, roles and the
//!   audit log.
//! - **Financial records** whose lifecycles live in `muni-state`: fines,
//!   levies, payments, services and ledger transactions.
//!
//! Every collection is an in-memory [`Store`]. When a PostgreSQL pool is
//! configured, each mutation is written through to the `documents` table
//! and the stores are hydrated from it at start-up.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use muni_core::{ReferenceKind, ReferenceSequence};
use muni_state::{Fine, Levy, Payment, Service, Transaction};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditOutcome, AuditSink};
use crate::commit::{self, CommitGate};
use crate::auth::{permission_catalogue, Access, Module, Permission};
use crate::error::AppError;

/// Attempts at reserving a reference number in the database before giving up.
const RESERVE_ATTEMPTS: usize = 5;

/// Name of the role seeded with every authority.
pub const ADMIN_ROLE: &str = "ADMINISTRADOR";

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (the RwLock is `parking_lot`, not `tokio::sync`)
/// because we never hold the lock across `.await` points. Inside a
/// [commit scope](crate::commit) every write journals the record's previous
/// value so a failed write-through can restore it.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync + 'static> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        let mut guard = self.data.write();
        self.journal(&guard, id);
        guard.insert(id, value)
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// List the records matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data.read().values().filter(|v| pred(v)).cloned().collect()
    }

    /// First record matching `pred`, in no particular order.
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.data.read().values().find(|v| pred(v)).cloned()
    }

    /// Whether any record matches `pred`.
    pub fn any(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.data.read().values().any(pred)
    }

    /// Update a record in place. Returns the updated record, or `None` if not found.
    pub fn update(&self, id: &Uuid, f: impl FnOnce(&mut T)) -> Option<T> {
        let mut guard = self.data.write();
        self.journal(&guard, *id);
        if let Some(entry) = guard.get_mut(id) {
            f(entry);
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under a single write lock. If it returns `Err`, the
    /// record is restored to its state before the call, so a rejected
    /// operation leaves no partial mutation behind.
    ///
    /// Returns `None` if the record doesn't exist.
    pub fn try_update<R, E>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut guard = self.data.write();
        if guard.contains_key(id) {
            self.journal(&guard, *id);
        }
        let entry = guard.get_mut(id)?;
        let before = entry.clone();
        let result = f(entry);
        if result.is_err() {
            *entry = before;
        }
        Some(result)
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        let mut guard = self.data.write();
        self.journal(&guard, *id);
        guard.remove(id)
    }

    /// Check if a record exists.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.data.read().contains_key(id)
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Journal the current value of `id` if a commit scope is open.
    fn journal(&self, current: &HashMap<Uuid, T>, id: Uuid) {
        if commit::is_open() {
            let prior = current.get(&id).cloned();
            let store = self.clone();
            commit::record::<T>(id, move || store.restore(id, prior));
        }
    }

    /// Put back a journaled value without journaling again.
    fn restore(&self, id: Uuid, prior: Option<T>) {
        let mut guard = self.data.write();
        match prior {
            Some(value) => {
                guard.insert(id, value);
            }
            None => {
                guard.remove(&id);
            }
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Persisted documents ------------------------------------------------------

/// A record persisted as a JSON document in its own collection.
pub trait Document: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Collection name in the `documents` table.
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;

    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! stamped_document {
    ($ty:ty, $collection:literal) => {
        impl Document for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> Uuid {
                self.id
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.stamp.created_at
            }
        }
    };
}

macro_rules! plain_document {
    ($ty:ty, $collection:literal) => {
        impl Document for $ty {
            const COLLECTION: &'static str = $collection;

            fn id(&self) -> Uuid {
                self.id
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        }
    };
}

stamped_document!(Fine, "fines");
stamped_document!(Levy, "levies");
stamped_document!(Payment, "payments");
stamped_document!(Service, "services");
stamped_document!(Transaction, "transactions");
plain_document!(Taxpayer, "taxpayers");
plain_document!(Tax, "taxes");
plain_document!(Declaration, "declarations");
plain_document!(Withholding, "withholdings");
plain_document!(Voucher, "vouchers");
plain_document!(Personnel, "personnel");
plain_document!(User, "users");
plain_document!(Role, "roles");

// -- Registry Record Types ----------------------------------------------------

/// Legal nature of a taxpayer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxpayerKind {
    NaturalPerson,
    LegalEntity,
}

impl TaxpayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NaturalPerson => "NATURAL_PERSON",
            Self::LegalEntity => "LEGAL_ENTITY",
        }
    }
}

/// Registered person or company (Contribuyente).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Taxpayer {
    pub id: Uuid,
    /// Fiscal registry number (RIF). Unique.
    pub tax_id: String,
    pub business_name: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub phone: Option<String>,
    pub email: String,
    pub kind: TaxpayerKind,
    pub legal_representative: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Taxpayer {
    /// Business name when present, else "first last".
    pub fn display_name(&self) -> String {
        match self.business_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{} {}", self.first_name, self.last_name)
                .trim()
                .to_string(),
        }
    }
}

/// A municipal tax with its rate (Impuesto).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tax {
    pub id: Uuid,
    /// Unique code.
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    /// Percentage, 0..=100.
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclarationStatus {
    Pending,
    Paid,
    Voided,
}

impl DeclarationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Voided => "VOIDED",
        }
    }
}

/// A taxpayer's self-assessment for one tax and period (Declaración).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Declaration {
    pub id: Uuid,
    pub taxpayer_id: Uuid,
    pub tax_id: Uuid,
    /// Free text, e.g. `2025-03`.
    pub period: String,
    pub taxable_base: Decimal,
    pub amount: Decimal,
    pub status: DeclarationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithholdingStatus {
    Pending,
    Applied,
    Voided,
}

impl WithholdingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Applied => "APPLIED",
            Self::Voided => "VOIDED",
        }
    }
}

/// Tax withheld at source (Retención).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Withholding {
    pub id: Uuid,
    pub taxpayer_id: Uuid,
    pub date: NaiveDate,
    pub concept: String,
    pub percentage: Decimal,
    pub base_amount: Decimal,
    pub withheld_amount: Decimal,
    pub status: WithholdingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherKind {
    Invoice,
    ReceiptSlip,
    CreditNote,
    DebitNote,
    Receipt,
}

impl VoucherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "INVOICE",
            Self::ReceiptSlip => "RECEIPT_SLIP",
            Self::CreditNote => "CREDIT_NOTE",
            Self::DebitNote => "DEBIT_NOTE",
            Self::Receipt => "RECEIPT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoucherStatus {
    Issued,
    Paid,
    Voided,
    Overdue,
}

impl VoucherStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issued => "ISSUED",
            Self::Paid => "PAID",
            Self::Voided => "VOIDED",
            Self::Overdue => "OVERDUE",
        }
    }
}

/// Fiscal voucher (Comprobante). `(kind, series, number)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Voucher {
    pub id: Uuid,
    pub taxpayer_id: Uuid,
    pub kind: VoucherKind,
    pub series: String,
    pub number: String,
    pub issue_date: NaiveDate,
    pub subtotal: Decimal,
    pub tax: Decimal,
    /// Always `subtotal + tax`.
    pub total: Decimal,
    pub status: VoucherStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Cc,
    Ce,
    Passport,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cc => "CC",
            Self::Ce => "CE",
            Self::Passport => "PASSPORT",
        }
    }
}

/// Municipal employee (Personal).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Personnel {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_names: String,
    pub last_names: String,
    pub document_type: DocumentType,
    /// Unique identity document.
    pub document: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub hired_on: Option<NaiveDate>,
    pub salary: Option<Decimal>,
    pub notes: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Personnel {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_names, self.last_names)
    }
}

/// Login account (Usuario). The password digest never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub role_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Named set of authorities (Rol).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the append-only audit log (AuditoriaLog).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: Uuid,
    pub username: String,
    pub personnel_document: Option<String>,
    pub action: AuditAction,
    pub module: Module,
    pub entity: String,
    pub entity_id: Option<Uuid>,
    pub description: String,
    pub previous_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub outcome: AuditOutcome,
    pub error_message: Option<String>,
}

// -- Application State --------------------------------------------------------

/// Application configuration.
///
/// Custom `Debug` redacts the `auth_token` and `database_url` to prevent
/// credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, authentication is disabled.
    pub auth_token: Option<String>,
    /// PostgreSQL URL. If `None`, the API runs in-memory only.
    pub database_url: Option<String>,
    /// Interval of the background overdue sweep; `0` disables it.
    pub overdue_sweep_secs: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("overdue_sweep_secs", &self.overdue_sweep_secs)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            database_url: None,
            overdue_sweep_secs: 3600,
        }
    }
}

/// Shared application state accessible to all route handlers.
///
/// Clone-friendly via `Arc` internals in each `Store`.
#[derive(Debug, Clone)]
pub struct AppState {
    // -- Tax registry --
    pub taxpayers: Store<Taxpayer>,
    pub taxes: Store<Tax>,
    pub declarations: Store<Declaration>,
    pub withholdings: Store<Withholding>,
    pub vouchers: Store<Voucher>,

    // -- Receivables and ledger --
    pub fines: Store<Fine>,
    pub levies: Store<Levy>,
    pub payments: Store<Payment>,
    pub services: Store<Service>,
    pub transactions: Store<Transaction>,

    // -- Staff and access control --
    pub personnel: Store<Personnel>,
    pub users: Store<User>,
    pub roles: Store<Role>,
    pub permissions: Arc<Vec<Permission>>,

    pub audit_log: Store<AuditEntry>,

    /// Fine, levy, service and transaction number generator.
    pub references: ReferenceSequence,

    /// When `Some`, every mutation is written through to PostgreSQL.
    pub db_pool: Option<PgPool>,
    pub commit_gate: CommitGate,

    pub config: AppConfig,
}

impl AppState {
    /// Create a new application state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// Create a new in-memory application state with the given configuration.
    pub fn with_config(config: AppConfig) -> Self {
        Self::with_pool(config, None)
    }

    /// Create a new application state with an optional database pool.
    pub fn with_pool(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        let state = Self {
            taxpayers: Store::new(),
            taxes: Store::new(),
            declarations: Store::new(),
            withholdings: Store::new(),
            vouchers: Store::new(),
            fines: Store::new(),
            levies: Store::new(),
            payments: Store::new(),
            services: Store::new(),
            transactions: Store::new(),
            personnel: Store::new(),
            users: Store::new(),
            roles: Store::new(),
            permissions: Arc::new(permission_catalogue()),
            audit_log: Store::new(),
            references: ReferenceSequence::new(),
            db_pool,
            commit_gate: CommitGate::default(),
            config,
        };
        state.seed_admin_role();
        state
    }

    /// Audit sink bound to this state's log and pool.
    pub fn audit_sink(&self) -> AuditSink {
        AuditSink::new(self.audit_log.clone(), self.db_pool.clone())
    }

    /// Whether `key` names a catalogue permission.
    pub fn is_known_permission(&self, key: &str) -> bool {
        self.permissions.iter().any(|p| p.key == key)
    }

    /// Ensure the administrator role exists with every `GESTIONAR` authority.
    ///
    /// Returns the role when it was created.
    pub fn seed_admin_role(&self) -> Option<Role> {
        if self.roles.any(|r| r.name == ADMIN_ROLE) {
            return None;
        }
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: ADMIN_ROLE.to_string(),
            description: Some("Acceso total a todos los módulos".to_string()),
            permissions: self
                .permissions
                .iter()
                .filter(|p| p.access == Access::Manage)
                .map(|p| p.key.clone())
                .collect(),
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(role.id, role.clone());
        Some(role)
    }

    /// Write a record through to the database, if one is configured.
    ///
    /// Called after the in-memory mutation, inside the command's
    /// [commit scope](crate::commit). On success the record is settled; on
    /// failure every unsettled write of the command is rolled back in
    /// memory and the error surfaces as 500.
    pub async fn persist<T: Document>(&self, record: &T) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            if let Err(e) = crate::db::documents::upsert(pool, record).await {
                let undone = commit::roll_back();
                tracing::error!(
                    collection = T::COLLECTION,
                    id = %record.id(),
                    undone,
                    error = %e,
                    "failed to persist record to database, in-memory change rolled back"
                );
                return Err(AppError::Internal(format!(
                    "{} {} could not be stored; the change was not applied",
                    T::COLLECTION,
                    record.id()
                )));
            }
            commit::settle::<T>(record.id());
        }
        Ok(())
    }

    /// Delete a record's document, if a database is configured.
    pub async fn forget<T: Document>(&self, id: Uuid) -> Result<(), AppError> {
        if let Some(pool) = &self.db_pool {
            if let Err(e) = crate::db::documents::delete(pool, T::COLLECTION, id).await {
                let undone = commit::roll_back();
                tracing::error!(
                    collection = T::COLLECTION,
                    id = %id,
                    undone,
                    error = %e,
                    "failed to delete record from database, in-memory change rolled back"
                );
                return Err(AppError::Internal(format!(
                    "{} {id} could not be deleted; the change was not applied",
                    T::COLLECTION
                )));
            }
            commit::settle::<T>(id);
        }
        Ok(())
    }

    /// Draw a fresh reference number.
    ///
    /// In-process uniqueness comes from [`ReferenceSequence`]; `is_taken`
    /// probes the live store. With a database, the number is also reserved
    /// in `reference_numbers`; a number another process already holds is
    /// skipped and the next candidate drawn, up to a bounded number of
    /// attempts, after which the caller gets 409.
    pub async fn allocate_reference(
        &self,
        kind: ReferenceKind,
        now: DateTime<Utc>,
        is_taken: impl Fn(&str) -> bool,
    ) -> Result<String, AppError> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(self.references.next(kind, now, &is_taken)?),
        };

        for attempt in 1..=RESERVE_ATTEMPTS {
            let candidate = self.references.next(kind, now, &is_taken)?;
            match crate::db::references::reserve(pool, kind, &candidate).await {
                Ok(true) => return Ok(candidate),
                Ok(false) => {
                    tracing::warn!(
                        kind = %kind,
                        number = %candidate,
                        attempt,
                        "reference number already reserved, drawing the next one"
                    );
                }
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "failed to reserve reference number");
                    return Err(AppError::Internal(format!(
                        "could not reserve {kind} reference number"
                    )));
                }
            }
        }

        Err(AppError::Conflict(format!(
            "could not allocate a unique {kind} number after {RESERVE_ATTEMPTS} attempts"
        )))
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        let taxpayers = load_into(pool, &self.taxpayers).await?;
        let taxes = load_into(pool, &self.taxes).await?;
        let declarations = load_into(pool, &self.declarations).await?;
        let withholdings = load_into(pool, &self.withholdings).await?;
        let vouchers = load_into(pool, &self.vouchers).await?;
        let fines = load_into(pool, &self.fines).await?;
        let levies = load_into(pool, &self.levies).await?;
        let payments = load_into(pool, &self.payments).await?;
        let services = load_into(pool, &self.services).await?;
        let transactions = load_into(pool, &self.transactions).await?;
        let personnel = load_into(pool, &self.personnel).await?;
        let users = load_into(pool, &self.users).await?;

        // The seeded admin role is replaced by the persisted one, if any.
        let persisted_roles = crate::db::documents::load_all::<Role>(pool)
            .await
            .map_err(|e| format!("failed to load roles: {e}"))?;
        if persisted_roles.iter().any(|r| r.name == ADMIN_ROLE) {
            for seeded in self.roles.filter(|r| r.name == ADMIN_ROLE) {
                self.roles.remove(&seeded.id);
            }
        }
        let roles = persisted_roles.len();
        for role in persisted_roles {
            self.roles.insert(role.id, role);
        }
        if let Some(seeded) = self.roles.find(|r| r.name == ADMIN_ROLE) {
            crate::db::documents::upsert(pool, &seeded)
                .await
                .map_err(|e| format!("failed to persist admin role: {e}"))?;
        }

        let audit_entries = crate::db::audit::load_all(pool)
            .await
            .map_err(|e| format!("failed to load audit log: {e}"))?;
        let audit = audit_entries.len();
        for entry in audit_entries {
            self.audit_log.insert(entry.id, entry);
        }

        tracing::info!(
            taxpayers,
            taxes,
            declarations,
            withholdings,
            vouchers,
            fines,
            levies,
            payments,
            services,
            transactions,
            personnel,
            users,
            roles,
            audit,
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_into<T: Document>(pool: &PgPool, store: &Store<T>) -> Result<usize, String> {
    let records = crate::db::documents::load_all::<T>(pool)
        .await
        .map_err(|e| format!("failed to load {}: {e}", T::COLLECTION))?;
    let count = records.len();
    for record in records {
        store.insert(record.id(), record);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tax(code: &str) -> Tax {
        let now = Utc::now();
        Tax {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: format!("Impuesto {code}"),
            description: None,
            rate: Decimal::new(15, 0),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_taxpayer(business_name: Option<&str>) -> Taxpayer {
        let now = Utc::now();
        Taxpayer {
            id: Uuid::new_v4(),
            tax_id: "J-12345678-9".into(),
            business_name: business_name.map(String::from),
            first_name: "Ana".into(),
            last_name: "Pérez".into(),
            address: "Calle 1".into(),
            phone: None,
            email: "ana@example.com".into(),
            kind: TaxpayerKind::NaturalPerson,
            legal_representative: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    // -- Store tests ----------------------------------------------------------

    #[test]
    fn store_new_creates_empty_store() {
        let store: Store<Tax> = Store::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.list().is_empty());
    }

    #[test]
    fn store_insert_and_get_roundtrip() {
        let store = Store::new();
        let tax = sample_tax("IAE");
        let id = tax.id;

        assert!(store.insert(id, tax).is_none());
        let retrieved = store.get(&id).unwrap();
        assert_eq!(retrieved.code, "IAE");
    }

    #[test]
    fn store_insert_returns_previous_value() {
        let store = Store::new();
        let tax = sample_tax("IAE");
        let id = tax.id;
        store.insert(id, tax.clone());
        assert!(store.insert(id, tax).is_some());
    }

    #[test]
    fn store_update_returns_none_for_missing_key() {
        let store: Store<Tax> = Store::new();
        assert!(store.update(&Uuid::new_v4(), |t| t.code.clear()).is_none());
    }

    #[test]
    fn store_try_update_commits_on_ok() {
        let store = Store::new();
        let tax = sample_tax("IAE");
        let id = tax.id;
        store.insert(id, tax);

        let result: Option<Result<(), String>> = store.try_update(&id, |t| {
            t.rate = Decimal::new(20, 0);
            Ok(())
        });
        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(store.get(&id).unwrap().rate, Decimal::new(20, 0));
    }

    #[test]
    fn store_try_update_rolls_back_on_err() {
        let store = Store::new();
        let tax = sample_tax("IAE");
        let id = tax.id;
        store.insert(id, tax);

        let result: Option<Result<(), String>> = store.try_update(&id, |t| {
            t.rate = Decimal::new(99, 0);
            Err("rejected".to_string())
        });
        assert!(matches!(result, Some(Err(_))));
        assert_eq!(store.get(&id).unwrap().rate, Decimal::new(15, 0));
    }

    #[test]
    fn store_try_update_missing_key() {
        let store: Store<Tax> = Store::new();
        let result: Option<Result<(), String>> = store.try_update(&Uuid::new_v4(), |_| Ok(()));
        assert!(result.is_none());
    }

    #[test]
    fn store_queries() {
        let store = Store::new();
        for code in ["A", "B", "C"] {
            let tax = sample_tax(code);
            store.insert(tax.id, tax);
        }
        assert!(store.any(|t| t.code == "B"));
        assert!(!store.any(|t| t.code == "Z"));
        assert_eq!(store.find(|t| t.code == "C").unwrap().code, "C");
        assert_eq!(store.filter(|t| t.code != "A").len(), 2);
    }

    #[test]
    fn store_remove_and_contains() {
        let store = Store::new();
        let tax = sample_tax("IAE");
        let id = tax.id;
        store.insert(id, tax);
        assert!(store.contains(&id));
        assert_eq!(store.remove(&id).unwrap().id, id);
        assert!(!store.contains(&id));
        assert!(store.remove(&id).is_none());
    }

    #[test]
    fn store_clone_shares_underlying_data() {
        let store = Store::new();
        let clone = store.clone();
        let tax = sample_tax("IAE");
        clone.insert(tax.id, tax);
        assert_eq!(store.len(), 1);
    }

    // -- Record tests ---------------------------------------------------------

    #[test]
    fn display_name_prefers_business_name() {
        assert_eq!(sample_taxpayer(Some("Comercial Ana C.A.")).display_name(), "Comercial Ana C.A.");
        assert_eq!(sample_taxpayer(None).display_name(), "Ana Pérez");
        assert_eq!(sample_taxpayer(Some("  ")).display_name(), "Ana Pérez");
    }

    #[test]
    fn user_password_hash_is_persisted_but_not_a_schema() {
        let user = User {
            id: Uuid::new_v4(),
            username: "ana.perez".into(),
            email: "ana.perez@municipio.local".into(),
            password_hash: "salt$digest".into(),
            active: true,
            role_ids: vec![],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["password_hash"], "salt$digest");
    }

    // -- AppState tests -------------------------------------------------------

    #[test]
    fn app_state_new_uses_default_config() {
        let state = AppState::new();
        assert_eq!(state.config.port, 8080);
        assert!(state.config.auth_token.is_none());
        assert_eq!(state.config.overdue_sweep_secs, 3600);
        assert!(state.db_pool.is_none());
    }

    #[test]
    fn app_state_seeds_admin_role_once() {
        let state = AppState::new();
        let admins = state.roles.filter(|r| r.name == ADMIN_ROLE);
        assert_eq!(admins.len(), 1);
        assert!(admins[0].permissions.contains("MULTAS_GESTIONAR"));
        assert_eq!(admins[0].permissions.len(), Module::ALL.len());
        assert!(state.seed_admin_role().is_none());
    }

    #[test]
    fn app_state_knows_catalogue_permissions() {
        let state = AppState::new();
        assert!(state.is_known_permission("PAGOS_WRITE"));
        assert!(!state.is_known_permission("PAGOS_FLY"));
    }

    #[test]
    fn app_config_debug_redacts_secrets() {
        let config = AppConfig {
            auth_token: Some("super-secret".into()),
            database_url: Some("postgres://u:p@db/muni".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("u:p@db"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn allocate_reference_without_database() {
        let state = AppState::new();
        let now = Utc::now();
        let a = state
            .allocate_reference(ReferenceKind::Fine, now, |_| false)
            .await
            .unwrap();
        let b = state
            .allocate_reference(ReferenceKind::Fine, now, |n| n == a)
            .await
            .unwrap();
        assert!(a.starts_with("MUL-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn persist_is_noop_without_database() {
        let state = AppState::new();
        assert!(state.persist(&sample_tax("IAE")).await.is_ok());
        assert!(state.forget::<Tax>(Uuid::new_v4()).await.is_ok());
    }
}
