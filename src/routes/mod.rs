pub mod health_checks;
pub mod webhook;

pub use health_checks::*;
