use crate::models::Project;
use crate::store::{ProjectStore, StoreError};

/// The active project for a repository. `None` is a normal outcome:
/// deliveries for unknown repositories are acknowledged and dropped.
#[tracing::instrument(name = "Resolve project", skip(projects))]
pub async fn resolve(
    projects: &dyn ProjectStore,
    repository_id: i64,
) -> Result<Option<Project>, StoreError> {
    let project = projects.active_by_repository(repository_id).await?;
    if project.is_none() {
        tracing::info!("No active project for repository");
    }
    Ok(project)
}
