use crate::models::EnvVar;
use crate::store::StoreError;
use sqlx::PgConnection;

pub async fn fetch_by_project(
    conn: &mut PgConnection,
    project_id: i32,
) -> Result<Vec<EnvVar>, StoreError> {
    sqlx::query_as::<_, EnvVar>(
        r#"
        SELECT id, project_id, key, value, is_secret, created_at, updated_at
        FROM env_var
        WHERE project_id = $1
        ORDER BY key
        "#,
    )
    .bind(project_id)
    .fetch_all(conn)
    .await
    .map_err(|err| {
        tracing::error!("Failed to fetch env vars, error: {:?}", err);
        StoreError::from(err)
    })
}

pub async fn count_by_project(conn: &mut PgConnection, project_id: i32) -> Result<i64, StoreError> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM env_var WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(conn)
        .await
        .map_err(StoreError::from)
}

pub async fn exists(conn: &mut PgConnection, project_id: i32, key: &str) -> Result<bool, StoreError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM env_var WHERE project_id = $1 AND key = $2)",
    )
    .bind(project_id)
    .bind(key)
    .fetch_one(conn)
    .await
    .map_err(StoreError::from)
}

/// `value` must already be encrypted when `is_secret` is set.
pub async fn upsert(
    conn: &mut PgConnection,
    project_id: i32,
    key: &str,
    value: &str,
    is_secret: bool,
) -> Result<EnvVar, StoreError> {
    sqlx::query_as::<_, EnvVar>(
        r#"
        INSERT INTO env_var (project_id, key, value, is_secret)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (project_id, key)
        DO UPDATE SET value = EXCLUDED.value, is_secret = EXCLUDED.is_secret, updated_at = NOW()
        RETURNING id, project_id, key, value, is_secret, created_at, updated_at
        "#,
    )
    .bind(project_id)
    .bind(key)
    .bind(value)
    .bind(is_secret)
    .fetch_one(conn)
    .await
    .map_err(|err| {
        tracing::error!("Failed to upsert env var, error: {:?}", err);
        StoreError::from(err)
    })
}
