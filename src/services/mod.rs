pub mod app_name;
pub mod context;
pub mod delivery_store;
pub mod deployer;
pub mod descriptor;
pub mod env_vars;
pub mod errors;
pub mod ingress;
pub mod notifier;
pub mod reconciler;
pub mod resolver;
pub mod sweeper;
pub mod teardown;
pub mod worker;

pub use context::AppContext;
pub use delivery_store::{DeliveryStore, RedisDeliveryStore};
pub use errors::DeployError;
pub use ingress::{Ingress, IngressError, Intent};
pub use worker::{Job, JobQueue};
