//! External Service Connectors
//!
//! Adapters for the compute platform that runs preview apps and the
//! source-control host that sends webhooks and receives PR comments.
//!
//! ## Architecture Pattern
//!
//! 1. Define trait in `{service}/mod.rs` → allows faking in tests
//! 2. HTTP implementation in `{service}/client.rs`
//! 3. In-memory fake in `{service}/mock.rs` (test builds only)
//! 4. Executors hold `Arc<dyn Trait>` and never see HTTP details

pub mod errors;
pub mod platform;
pub mod source_control;

pub use errors::ConnectorError;
pub use platform::{App, BuildContext, ComputePlatform, DeployConfig, PlatformClient};
pub use source_control::{GithubClient, SourceControl};
