use crate::services::sweeper;
use actix_web::rt;

/// One sweep pass; meant to be scheduled from cron or similar.
pub struct RunCommand;

impl RunCommand {
    pub fn new() -> Self {
        Self
    }
}

impl crate::console::commands::CallableTrait for RunCommand {
    fn call(&self) -> Result<(), Box<dyn std::error::Error>> {
        rt::System::new().block_on(async {
            let (_, ctx) = crate::console::commands::connect().await?;
            let report = sweeper::run(&ctx).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        })
    }
}
