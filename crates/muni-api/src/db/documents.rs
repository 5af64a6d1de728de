//! Record persistence as JSON documents.
//!
//! Every collection shares the `documents` table. Lifecycle rules are
//! enforced by the in-memory records before anything reaches SQL; this
//! module only stores and loads snapshots.

use sqlx::PgPool;
use uuid::Uuid;

use crate::state::Document;

fn encode<T: Document>(record: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(record).map_err(|e| {
        tracing::error!(collection = T::COLLECTION, error = %e, "failed to serialize record");
        sqlx::Error::Encode(Box::new(e))
    })
}

/// Insert or replace a record's document.
pub async fn upsert<T: Document>(pool: &PgPool, record: &T) -> Result<(), sqlx::Error> {
    let body = encode(record)?;

    sqlx::query(
        "INSERT INTO documents (collection, id, body, created_at, updated_at)
         VALUES ($1, $2, $3, $4, NOW())
         ON CONFLICT (collection, id)
         DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()",
    )
    .bind(T::COLLECTION)
    .bind(record.id())
    .bind(&body)
    .bind(record.created_at())
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete a record's document. Returns whether a row was removed.
pub async fn delete(pool: &PgPool, collection: &str, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Load every document of a collection.
///
/// A document that no longer decodes is logged and skipped rather than
/// failing start-up for the whole collection.
pub async fn load_all<T: Document>(pool: &PgPool) -> Result<Vec<T>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, body FROM documents WHERE collection = $1 ORDER BY created_at ASC",
    )
    .bind(T::COLLECTION)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        match serde_json::from_value::<T>(row.body) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::error!(
                    collection = T::COLLECTION,
                    id = %row.id,
                    error = %e,
                    "skipping undecodable document"
                );
            }
        }
    }
    Ok(records)
}

/// Database row for a stored document.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    body: serde_json::Value,
}
