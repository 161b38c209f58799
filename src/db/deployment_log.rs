use crate::models::{DeploymentLog, LogLevel};
use crate::store::StoreError;
use sqlx::PgConnection;

pub async fn insert(
    conn: &mut PgConnection,
    deployment_id: i32,
    level: LogLevel,
    step: &str,
    message: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO deployment_log (deployment_id, level, step, message) VALUES ($1, $2, $3, $4)",
    )
    .bind(deployment_id)
    .bind(level.as_str())
    .bind(step)
    .bind(message)
    .execute(conn)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to append deployment log, error: {:?}", err);
        StoreError::from(err)
    })
}

pub async fn fetch_by_deployment(
    conn: &mut PgConnection,
    deployment_id: i32,
) -> Result<Vec<DeploymentLog>, StoreError> {
    sqlx::query_as::<_, DeploymentLog>(
        r#"
        SELECT id, deployment_id, level, step, message, created_at
        FROM deployment_log
        WHERE deployment_id = $1
        ORDER BY id
        "#,
    )
    .bind(deployment_id)
    .fetch_all(conn)
    .await
    .map_err(StoreError::from)
}
