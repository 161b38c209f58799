use crate::models::Project;
use crate::store::StoreError;
use sqlx::PgConnection;
use tracing::Instrument;

const COLUMNS: &str = r#"
    id, user_id, repository_id, repository_owner, repository_name, repository_full_name,
    default_branch, install_command, build_command, start_command, port, dockerfile_path,
    app_name_prefix, region, installation_id, active, created_at, updated_at
"#;

pub async fn fetch(conn: &mut PgConnection, id: i32) -> Result<Option<Project>, StoreError> {
    tracing::debug!("Fetch project {}", id);
    let sql = format!("SELECT {} FROM project WHERE id = $1", COLUMNS);
    sqlx::query_as::<_, Project>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch project, error: {:?}", err);
            StoreError::from(err)
        })
}

pub async fn fetch_active_by_repository(
    conn: &mut PgConnection,
    repository_id: i64,
) -> Result<Option<Project>, StoreError> {
    let query_span = tracing::info_span!("Fetch active project by repository", repository_id);
    let sql = format!(
        "SELECT {} FROM project WHERE repository_id = $1 AND active LIMIT 1",
        COLUMNS
    );
    sqlx::query_as::<_, Project>(&sql)
        .bind(repository_id)
        .fetch_optional(conn)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to fetch project, error: {:?}", err);
            StoreError::from(err)
        })
}

pub async fn insert(conn: &mut PgConnection, project: &Project) -> Result<Project, StoreError> {
    let query_span = tracing::info_span!("Saving new project into the database");
    let sql = format!(
        r#"
        INSERT INTO project (
            user_id, repository_id, repository_owner, repository_name, repository_full_name,
            default_branch, install_command, build_command, start_command, port,
            dockerfile_path, app_name_prefix, region, installation_id, active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        RETURNING {}
        "#,
        COLUMNS
    );
    sqlx::query_as::<_, Project>(&sql)
        .bind(&project.user_id)
        .bind(project.repository_id)
        .bind(&project.repository_owner)
        .bind(&project.repository_name)
        .bind(&project.repository_full_name)
        .bind(&project.default_branch)
        .bind(&project.install_command)
        .bind(&project.build_command)
        .bind(&project.start_command)
        .bind(project.port)
        .bind(&project.dockerfile_path)
        .bind(&project.app_name_prefix)
        .bind(&project.region)
        .bind(project.installation_id)
        .bind(project.active)
        .fetch_one(conn)
        .instrument(query_span)
        .await
        .map_err(|err| {
            tracing::error!("Failed to insert project, error: {:?}", err);
            StoreError::from(err)
        })
}

/// Returns false when the project was already inactive.
pub async fn deactivate(conn: &mut PgConnection, id: i32) -> Result<bool, StoreError> {
    sqlx::query("UPDATE project SET active = FALSE, updated_at = NOW() WHERE id = $1 AND active")
        .bind(id)
        .execute(conn)
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|err| {
            tracing::error!("Failed to deactivate project, error: {:?}", err);
            StoreError::from(err)
        })
}

pub async fn update_repository(
    conn: &mut PgConnection,
    id: i32,
    owner: &str,
    name: &str,
    full_name: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE project
        SET repository_owner = $2,
            repository_name = $3,
            repository_full_name = $4,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(owner)
    .bind(name)
    .bind(full_name)
    .execute(conn)
    .await
    .map(|_| ())
    .map_err(|err| {
        tracing::error!("Failed to update project repository, error: {:?}", err);
        StoreError::from(err)
    })
}
