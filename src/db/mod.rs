pub mod deployment;
pub mod deployment_log;
pub mod env_var;
pub mod project;
pub mod tx;
