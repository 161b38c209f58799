//! Transaction helpers for the reconcile path.

use crate::store::StoreError;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// Advisory lock key for one pull request of one project.
pub fn pr_lock_key(project_id: i32, pr_number: i32) -> i64 {
    ((project_id as i64) << 32) | (pr_number as u32 as i64)
}

/// SERIALIZABLE transaction with `lock_timeout` applied to everything in it.
pub async fn begin_serializable(
    pool: &PgPool,
    lock_timeout_ms: u64,
) -> Result<Transaction<'static, Postgres>, StoreError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    // SET does not take bind parameters
    sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Blocks until this transaction owns the PR, or fails with
/// [`StoreError::LockTimeout`].
pub async fn lock_pr(
    conn: &mut PgConnection,
    project_id: i32,
    pr_number: i32,
) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(pr_lock_key(project_id, pr_number))
        .execute(conn)
        .await
        .map(|_| ())
        .map_err(|err| {
            let err = StoreError::from(err);
            tracing::warn!(project_id, pr_number, "PR lock not acquired: {}", err);
            err
        })
}
