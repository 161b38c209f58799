use crate::services::ingress::RepositoryChange;
use crate::services::worker::{self, Job};
use actix_web::rt;

/// Same path as an archived repository: deactivate, then tear down every
/// live preview of the project.
pub struct DeactivateCommand {
    project_id: i32,
}

impl DeactivateCommand {
    pub fn new(project_id: i32) -> Self {
        Self { project_id }
    }
}

impl crate::console::commands::CallableTrait for DeactivateCommand {
    fn call(&self) -> Result<(), Box<dyn std::error::Error>> {
        rt::System::new().block_on(async {
            let (_, ctx) = crate::console::commands::connect().await?;
            let project = ctx
                .projects
                .fetch_project(self.project_id)
                .await?
                .ok_or_else(|| format!("project {} not found", self.project_id))?;
            if !project.active {
                println!("project {} is already inactive", project.id);
                return Ok(());
            }

            let job = Job::Repository {
                repository_id: project.repository_id,
                change: RepositoryChange::Deactivate,
            };
            worker::process(&ctx, &job).await?;
            println!("project {} deactivated", project.id);
            Ok(())
        })
    }
}
