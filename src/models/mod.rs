mod deployment;
mod deployment_log;
mod env_var;
mod project;

pub use deployment::*;
pub use deployment_log::*;
pub use env_var::*;
pub use project::*;
