use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project scoped variable injected into preview apps. Secret values are
/// only ever persisted encrypted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnvVar {
    pub id: i32,
    pub project_id: i32,
    pub key: String,
    #[serde(skip_serializing)]
    pub value: String,
    pub is_secret: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
