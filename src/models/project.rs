use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forms::BuildConfig;

/// Binding between a repository and its preview deployment settings.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct Project {
    pub id: i32,
    pub user_id: String, // external unique identifier for the user
    pub repository_id: i64,
    pub repository_owner: String,
    pub repository_name: String,
    pub repository_full_name: String,
    pub default_branch: String,
    pub install_command: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
    pub port: Option<i32>,
    pub dockerfile_path: Option<String>, // None => generated
    pub app_name_prefix: String,
    pub region: String,
    pub installation_id: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Build settings with the documented defaults filled in.
    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            install_command: self.install_command.clone(),
            build_command: self.build_command.clone(),
            start_command: self.start_command.clone(),
            port: self.port.and_then(|p| u16::try_from(p).ok()),
            dockerfile_path: self.dockerfile_path.clone(),
            env_vars: Default::default(),
        }
    }
}

impl Default for Project {
    fn default() -> Self {
        Project {
            id: 0,
            user_id: "".to_string(),
            repository_id: 0,
            repository_owner: "".to_string(),
            repository_name: "".to_string(),
            repository_full_name: "".to_string(),
            default_branch: "main".to_string(),
            install_command: None,
            build_command: None,
            start_command: None,
            port: None,
            dockerfile_path: None,
            app_name_prefix: "".to_string(),
            region: "".to_string(),
            installation_id: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
