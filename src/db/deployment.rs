use crate::models::{Deployment, DeploymentStatus, TEARDOWN_REQUESTED};
use crate::store::{StatusChange, StoreError};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::Instrument;

const COLUMNS: &str = r#"
    id, project_id, pr_number, pr_title, branch, commit_sha, app_name, preview_url,
    status, error_message, started_at, completed_at, destroyed_at, metadata,
    created_at, updated_at
"#;

fn log_error(action: &str, err: sqlx::Error) -> StoreError {
    tracing::error!("Failed to {} deployment, error: {:?}", action, err);
    StoreError::from(err)
}

pub async fn fetch(conn: &mut PgConnection, id: i32) -> Result<Option<Deployment>, StoreError> {
    tracing::debug!("Fetch deployment {}", id);
    let sql = format!("SELECT {} FROM deployment WHERE id = $1", COLUMNS);
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|err| log_error("fetch", err))
}

/// Newest row for the pull request, whatever its status.
pub async fn latest_for_pr(
    conn: &mut PgConnection,
    project_id: i32,
    pr_number: i32,
) -> Result<Option<Deployment>, StoreError> {
    let query_span = tracing::info_span!("Fetch latest deployment for PR", project_id, pr_number);
    let sql = format!(
        r#"
        SELECT {} FROM deployment
        WHERE project_id = $1 AND pr_number = $2
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(project_id)
        .bind(pr_number)
        .fetch_optional(conn)
        .instrument(query_span)
        .await
        .map_err(|err| log_error("fetch latest", err))
}

pub async fn insert(
    conn: &mut PgConnection,
    deployment: &Deployment,
) -> Result<Deployment, StoreError> {
    let query_span = tracing::info_span!("Saving new deployment into the database");
    let sql = format!(
        r#"
        INSERT INTO deployment (
            project_id, pr_number, pr_title, branch, commit_sha, app_name, status,
            started_at, metadata, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(deployment.project_id)
        .bind(deployment.pr_number)
        .bind(&deployment.pr_title)
        .bind(&deployment.branch)
        .bind(&deployment.commit_sha)
        .bind(&deployment.app_name)
        .bind(deployment.status.as_str())
        .bind(deployment.started_at)
        .bind(&deployment.metadata)
        .fetch_one(conn)
        .instrument(query_span)
        .await
        .map_err(|err| log_error("insert", err))
}

/// Reuse the row for a new commit: back to pending with a fresh cooldown
/// anchor. The app name is kept.
pub async fn reset(
    conn: &mut PgConnection,
    id: i32,
    commit_sha: &str,
    branch: &str,
    pr_title: &str,
) -> Result<Deployment, StoreError> {
    let query_span = tracing::info_span!("Resetting deployment for redeploy", id);
    let sql = format!(
        r#"
        UPDATE deployment
        SET commit_sha = $2,
            branch = $3,
            pr_title = $4,
            status = 'pending',
            error_message = NULL,
            completed_at = NULL,
            started_at = NOW(),
            metadata = metadata - $5::text,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(id)
        .bind(commit_sha)
        .bind(branch)
        .bind(pr_title)
        .bind(TEARDOWN_REQUESTED)
        .fetch_one(conn)
        .instrument(query_span)
        .await
        .map_err(|err| log_error("reset", err))
}

/// Conditional status write. Returns `None` when the row is not in one of
/// `from`, which makes executor steps safe to re-run.
pub async fn set_status(
    conn: &mut PgConnection,
    id: i32,
    from: &[DeploymentStatus],
    change: &StatusChange,
) -> Result<Option<Deployment>, StoreError> {
    let query_span = tracing::info_span!("Updating deployment status", id, to = %change.to);
    let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
    let sql = format!(
        r#"
        UPDATE deployment
        SET status = $2,
            preview_url = COALESCE($3, preview_url),
            error_message = COALESCE($4, error_message),
            completed_at = COALESCE($5, completed_at),
            destroyed_at = COALESCE($6, destroyed_at),
            updated_at = NOW()
        WHERE id = $1 AND status = ANY($7)
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(id)
        .bind(change.to.as_str())
        .bind(&change.preview_url)
        .bind(&change.error_message)
        .bind(change.completed_at)
        .bind(change.destroyed_at)
        .bind(&from)
        .fetch_optional(conn)
        .instrument(query_span)
        .await
        .map_err(|err| log_error("update status of", err))
}

pub async fn mark_teardown_requested(
    conn: &mut PgConnection,
    id: i32,
) -> Result<Deployment, StoreError> {
    let sql = format!(
        r#"
        UPDATE deployment
        SET metadata = jsonb_set(metadata, ARRAY[$2::text], 'true'::jsonb),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(id)
        .bind(TEARDOWN_REQUESTED)
        .fetch_one(conn)
        .await
        .map_err(|err| log_error("flag", err))
}

/// Held by any row that is not destroyed, in any project.
pub async fn app_name_taken(conn: &mut PgConnection, app_name: &str) -> Result<bool, StoreError> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM deployment WHERE app_name = $1 AND status <> 'destroyed')",
    )
    .bind(app_name)
    .fetch_one(conn)
    .await
    .map_err(|err| log_error("check app name of", err))
}

pub async fn update_app_name(
    conn: &mut PgConnection,
    id: i32,
    app_name: &str,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE deployment SET app_name = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(app_name)
        .execute(conn)
        .await
        .map(|_| ())
        .map_err(|err| log_error("rename", err))
}

pub async fn stuck_destroying(
    conn: &mut PgConnection,
    older_than: DateTime<Utc>,
) -> Result<Vec<Deployment>, StoreError> {
    let sql = format!(
        "SELECT {} FROM deployment WHERE status = 'destroying' AND updated_at < $1 ORDER BY id",
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(older_than)
        .fetch_all(conn)
        .await
        .map_err(|err| log_error("list stuck", err))
}

/// Rows still holding platform resources although their project is gone or
/// deactivated.
pub async fn orphaned(conn: &mut PgConnection) -> Result<Vec<Deployment>, StoreError> {
    let columns = COLUMNS
        .split(',')
        .map(|c| format!("d.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        r#"
        SELECT {} FROM deployment d
        LEFT JOIN project p ON p.id = d.project_id
        WHERE d.status <> 'destroyed' AND (p.id IS NULL OR NOT p.active)
        ORDER BY d.id
        "#,
        columns
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .fetch_all(conn)
        .await
        .map_err(|err| log_error("list orphaned", err))
}

/// Rows a teardown should reach: anything not already on the way out.
pub async fn live_for_project(
    conn: &mut PgConnection,
    project_id: i32,
) -> Result<Vec<Deployment>, StoreError> {
    let sql = format!(
        r#"
        SELECT {} FROM deployment
        WHERE project_id = $1 AND status NOT IN ('destroying', 'destroyed')
        ORDER BY pr_number
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Deployment>(&sql)
        .bind(project_id)
        .fetch_all(conn)
        .await
        .map_err(|err| log_error("list live", err))
}
