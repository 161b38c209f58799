mod build_config;
mod env_var;
pub mod webhook;

pub use build_config::*;
pub use env_var::*;
pub use webhook::*;
