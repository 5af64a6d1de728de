//! Audit log persistence — immutable hash chain.
//!
//! Every audited command appends one row whose `entry_hash` is
//! SHA-256(previous_hash || entry fields). Appends are serialized with a
//! transaction-scoped advisory lock so concurrent writers never fork the
//! chain. Rows are never updated or deleted.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::Module;
use crate::state::AuditEntry;

/// `previous_hash` of the first row.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Advisory lock key guarding appends.
const APPEND_LOCK_KEY: i64 = 0x4155_4449_54;

/// Append an entry to the immutable log.
pub async fn append(pool: &PgPool, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(APPEND_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    let previous_hash: Option<String> =
        sqlx::query_scalar("SELECT entry_hash FROM audit_log ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;
    let prev = previous_hash.as_deref().unwrap_or(GENESIS_HASH);
    let entry_hash = entry_hash(prev, entry);

    sqlx::query(
        "INSERT INTO audit_log (id, username, personnel_document, action, module, entity,
         entity_id, description, previous_values, new_values, ip_address, user_agent,
         session_id, occurred_at, outcome, error_message, previous_hash, entry_hash)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
    )
    .bind(entry.id)
    .bind(&entry.username)
    .bind(&entry.personnel_document)
    .bind(entry.action.as_str())
    .bind(entry.module.key())
    .bind(&entry.entity)
    .bind(entry.entity_id)
    .bind(&entry.description)
    .bind(&entry.previous_values)
    .bind(&entry.new_values)
    .bind(&entry.ip_address)
    .bind(&entry.user_agent)
    .bind(&entry.session_id)
    .bind(entry.occurred_at)
    .bind(entry.outcome.as_str())
    .bind(&entry.error_message)
    .bind(prev)
    .bind(&entry_hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Load the whole log in append order.
///
/// Rows whose enum columns no longer parse are logged and skipped.
pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = fetch_rows(pool, i64::MAX).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id;
            let entry = row.into_entry();
            if entry.is_none() {
                tracing::error!(id = %id, "skipping undecodable audit row");
            }
            entry
        })
        .collect())
}

/// Verify audit chain integrity by checking hash continuity and
/// recomputing every entry hash.
pub async fn verify_chain_integrity(
    pool: &PgPool,
    limit: i64,
) -> Result<ChainIntegrityResult, sqlx::Error> {
    let rows = fetch_rows(pool, limit).await?;
    Ok(verify_rows(&rows))
}

async fn fetch_rows(pool: &PgPool, limit: i64) -> Result<Vec<AuditRow>, sqlx::Error> {
    sqlx::query_as::<_, AuditRow>(
        "SELECT id, username, personnel_document, action, module, entity, entity_id,
         description, previous_values, new_values, ip_address, user_agent, session_id,
         occurred_at, outcome, error_message, previous_hash, entry_hash
         FROM audit_log ORDER BY seq ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

fn verify_rows(rows: &[AuditRow]) -> ChainIntegrityResult {
    let mut broken_links = 0;
    let mut tampered = 0;
    let mut last_hash = GENESIS_HASH;

    for row in rows {
        if row.previous_hash != last_hash {
            broken_links += 1;
        }
        if row.to_entry().map(|e| entry_hash(&row.previous_hash, &e)).as_deref()
            != Some(row.entry_hash.as_str())
        {
            tampered += 1;
        }
        last_hash = &row.entry_hash;
    }

    ChainIntegrityResult {
        total_events: rows.len(),
        broken_links,
        tampered_entries: tampered,
        chain_valid: broken_links == 0 && tampered == 0,
    }
}

/// Result of chain integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct ChainIntegrityResult {
    pub total_events: usize,
    pub broken_links: usize,
    pub tampered_entries: usize,
    pub chain_valid: bool,
}

/// Database row for audit entries.
#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    username: String,
    personnel_document: Option<String>,
    action: String,
    module: String,
    entity: String,
    entity_id: Option<Uuid>,
    description: String,
    previous_values: Option<serde_json::Value>,
    new_values: Option<serde_json::Value>,
    ip_address: String,
    user_agent: Option<String>,
    session_id: Option<String>,
    occurred_at: DateTime<Utc>,
    outcome: String,
    error_message: Option<String>,
    previous_hash: String,
    entry_hash: String,
}

impl AuditRow {
    fn to_entry(&self) -> Option<AuditEntry> {
        self.clone().into_entry()
    }

    fn into_entry(self) -> Option<AuditEntry> {
        Some(AuditEntry {
            id: self.id,
            username: self.username,
            personnel_document: self.personnel_document,
            action: parse_tag(&self.action)?,
            module: Module::from_key(&self.module)?,
            entity: self.entity,
            entity_id: self.entity_id,
            description: self.description,
            previous_values: self.previous_values,
            new_values: self.new_values,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            session_id: self.session_id,
            occurred_at: self.occurred_at,
            outcome: parse_tag(&self.outcome)?,
            error_message: self.error_message,
        })
    }
}

fn parse_tag<T: DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).ok()
}

/// SHA-256(previous_hash || id || username || action || module || entity ||
/// entity_id || description || occurred_at || outcome).
fn entry_hash(previous_hash: &str, entry: &AuditEntry) -> String {
    let hash_input = format!(
        "{}{}{}{}{}{}{}{}{}{}",
        previous_hash,
        entry.id,
        entry.username,
        entry.action.as_str(),
        entry.module.key(),
        entry.entity,
        entry.entity_id.map(|id| id.to_string()).unwrap_or_default(),
        entry.description,
        entry.occurred_at.timestamp_micros(),
        entry.outcome.as_str(),
    );
    sha256_hex(&hash_input)
}

/// Compute SHA-256 hex digest of input string.
fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditOutcome};

    fn row(previous_hash: &str, description: &str) -> AuditRow {
        let mut row = AuditRow {
            id: Uuid::new_v4(),
            username: "admin".into(),
            personnel_document: None,
            action: "CREATE".into(),
            module: "MULTAS".into(),
            entity: "fine".into(),
            entity_id: Some(Uuid::new_v4()),
            description: description.into(),
            previous_values: None,
            new_values: None,
            ip_address: "127.0.0.1".into(),
            user_agent: None,
            session_id: None,
            occurred_at: Utc::now(),
            outcome: "SUCCESS".into(),
            error_message: None,
            previous_hash: previous_hash.into(),
            entry_hash: String::new(),
        };
        let entry = row.to_entry().unwrap();
        row.entry_hash = entry_hash(previous_hash, &entry);
        row
    }

    fn chain(len: usize) -> Vec<AuditRow> {
        let mut rows: Vec<AuditRow> = Vec::new();
        for i in 0..len {
            let prev = rows
                .last()
                .map(|r| r.entry_hash.clone())
                .unwrap_or_else(|| GENESIS_HASH.to_string());
            rows.push(row(&prev, &format!("Created fine {i}")));
        }
        rows
    }

    #[test]
    fn row_decodes_to_entry() {
        let entry = row(GENESIS_HASH, "Created fine").into_entry().unwrap();
        assert_eq!(entry.action, AuditAction::Create);
        assert_eq!(entry.module, Module::Fines);
        assert_eq!(entry.outcome, AuditOutcome::Success);
    }

    #[test]
    fn unknown_module_does_not_decode() {
        let mut bad = row(GENESIS_HASH, "x");
        bad.module = "NOPE".into();
        assert!(bad.into_entry().is_none());
    }

    #[test]
    fn intact_chain_is_valid() {
        let result = verify_rows(&chain(4));
        assert_eq!(result.total_events, 4);
        assert!(result.chain_valid);
    }

    #[test]
    fn empty_chain_is_valid() {
        assert!(verify_rows(&[]).chain_valid);
    }

    #[test]
    fn edited_row_is_detected() {
        let mut rows = chain(3);
        rows[1].description = "Created nothing".into();
        let result = verify_rows(&rows);
        assert_eq!(result.tampered_entries, 1);
        assert_eq!(result.broken_links, 0);
        assert!(!result.chain_valid);
    }

    #[test]
    fn deleted_row_breaks_the_chain() {
        let mut rows = chain(3);
        rows.remove(1);
        let result = verify_rows(&rows);
        assert_eq!(result.broken_links, 1);
        assert!(!result.chain_valid);
    }

    #[test]
    fn sha256_hex_is_lowercase_64_chars() {
        let digest = sha256_hex("muni");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
