use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::collections::HashMap;

pub const DEFAULT_INSTALL_COMMAND: &str = "npm ci";
pub const DEFAULT_START_COMMAND: &str = "npm start";
pub const DEFAULT_PORT: u16 = 3000;

/// Build and runtime settings of a project. Every field is optional; the
/// accessors return the documented default when a field is unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct BuildConfig {
    #[validate(max_length = 1000)]
    pub install_command: Option<String>,
    #[validate(max_length = 1000)]
    pub build_command: Option<String>,
    #[validate(max_length = 1000)]
    pub start_command: Option<String>,
    #[validate(minimum = 1)]
    pub port: Option<u16>,
    #[validate(max_length = 255)]
    #[validate(pattern = r"^[A-Za-z0-9_.][A-Za-z0-9_./-]*$")]
    pub dockerfile_path: Option<String>,
    #[validate(max_properties = 100)]
    #[serde(default)]
    pub env_vars: HashMap<String, String>,
}

impl BuildConfig {
    pub fn install_command(&self) -> &str {
        non_empty(&self.install_command).unwrap_or(DEFAULT_INSTALL_COMMAND)
    }

    /// No build step unless configured.
    pub fn build_command(&self) -> Option<&str> {
        non_empty(&self.build_command)
    }

    pub fn start_command(&self) -> &str {
        non_empty(&self.start_command).unwrap_or(DEFAULT_START_COMMAND)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn dockerfile_path(&self) -> Option<&str> {
        non_empty(&self.dockerfile_path)
    }

    /// Boundary check: serde_valid rules plus path traversal.
    pub fn validated(self) -> Result<Self, String> {
        self.validate().map_err(|err| err.to_string())?;
        if let Some(path) = self.dockerfile_path() {
            if path.split('/').any(|segment| segment == "..") {
                return Err("dockerfile_path must stay inside the repository".to_string());
            }
        }
        Ok(self)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
