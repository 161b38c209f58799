pub mod env;
mod callable;
pub mod project;
pub mod sweep;

pub use callable::*;

use crate::configuration::{get_configuration, Settings};
use crate::services::AppContext;
use sqlx::PgPool;

/// Settings plus a context wired to the real database and clients.
pub(crate) async fn connect() -> anyhow::Result<(Settings, AppContext)> {
    let settings = get_configuration()?;
    let db_pool = PgPool::connect(&settings.database.connection_string()).await?;
    let ctx = AppContext::connect(&settings, db_pool)?;
    Ok((settings, ctx))
}
