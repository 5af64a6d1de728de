//! Reference number reservations.

use muni_core::ReferenceKind;
use sqlx::PgPool;

/// Reserve `number` for `kind`.
///
/// Returns `false` when another process already holds the number.
pub async fn reserve(pool: &PgPool, kind: ReferenceKind, number: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO reference_numbers (number, kind, reserved_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (number) DO NOTHING",
    )
    .bind(number)
    .bind(kind.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
