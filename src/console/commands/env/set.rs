use crate::forms::EnvVarForm;
use crate::services::env_vars;
use actix_web::rt;

pub struct SetCommand {
    project_id: i32,
    key: String,
    value: String,
    secret: bool,
}

impl SetCommand {
    pub fn new(project_id: i32, key: String, value: String, secret: bool) -> Self {
        Self {
            project_id,
            key,
            value,
            secret,
        }
    }
}

impl crate::console::commands::CallableTrait for SetCommand {
    fn call(&self) -> Result<(), Box<dyn std::error::Error>> {
        rt::System::new().block_on(async {
            let (settings, ctx) = crate::console::commands::connect().await?;
            let form = EnvVarForm {
                key: self.key.clone(),
                value: self.value.clone(),
                is_secret: self.secret,
            };
            let var = env_vars::set(
                ctx.projects.as_ref(),
                &ctx.cipher,
                self.project_id,
                form,
                settings.security.max_env_vars_per_project,
            )
            .await?;
            println!(
                "{} set on project {}{}",
                var.key,
                var.project_id,
                if var.is_secret { " (secret)" } else { "" }
            );
            Ok(())
        })
    }
}
