use serde::{Deserialize, Serialize};
use serde_valid::Validate;

/// A variable as entered by an operator, before encryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct EnvVarForm {
    #[validate(min_length = 1)]
    #[validate(max_length = 128)]
    #[validate(pattern = r"^[A-Za-z_][A-Za-z0-9_]*$")]
    pub key: String,
    #[validate(max_length = 32768)]
    pub value: String,
    #[serde(default)]
    pub is_secret: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(key: &str) -> EnvVarForm {
        EnvVarForm {
            key: key.to_string(),
            value: "v".to_string(),
            is_secret: false,
        }
    }

    #[test]
    fn accepts_shell_style_names() {
        assert!(form("DATABASE_URL").validate().is_ok());
        assert!(form("_private1").validate().is_ok());
    }

    #[test]
    fn rejects_names_the_shell_would_choke_on() {
        assert!(form("").validate().is_err());
        assert!(form("1ST").validate().is_err());
        assert!(form("A-B").validate().is_err());
        assert!(form("A B").validate().is_err());
    }
}
