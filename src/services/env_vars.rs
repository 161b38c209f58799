use crate::forms::EnvVarForm;
use crate::helpers::SecretCipher;
use crate::models::EnvVar;
use crate::store::{ProjectStore, StoreError};
use serde_valid::Validate;

/// Validate, encrypt when secret, and store one project variable. Adding a
/// key beyond `cap` is refused; replacing an existing key is not.
#[tracing::instrument(name = "Set env var", skip(projects, cipher, form), fields(key = %form.key, secret = form.is_secret))]
pub async fn set(
    projects: &dyn ProjectStore,
    cipher: &SecretCipher,
    project_id: i32,
    form: EnvVarForm,
    cap: i64,
) -> Result<EnvVar, StoreError> {
    form.validate()
        .map_err(|err| StoreError::Validation(err.to_string()))?;
    if projects.fetch_project(project_id).await?.is_none() {
        return Err(StoreError::Validation(format!("project {} not found", project_id)));
    }

    let stored = if form.is_secret {
        cipher.encrypt(&form.value).map_err(StoreError::Validation)?
    } else {
        form.value
    };
    projects
        .upsert_env_var(project_id, &form.key, &stored, form.is_secret, cap)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::context::testing::{project, TEST_KEY};
    use crate::store::MemoryStore;

    fn form(key: &str, value: &str, is_secret: bool) -> EnvVarForm {
        EnvVarForm {
            key: key.to_string(),
            value: value.to_string(),
            is_secret,
        }
    }

    #[tokio::test]
    async fn secrets_are_stored_encrypted() {
        let store = MemoryStore::new();
        let cipher = SecretCipher::new(TEST_KEY).unwrap();
        let project = store.add_project(project()).await;

        let var = set(&store, &cipher, project.id, form("API_TOKEN", "s3cr3t", true), 10)
            .await
            .unwrap();
        assert!(var.is_secret);
        assert_ne!(var.value, "s3cr3t");
        assert_eq!(cipher.decrypt(&var.value).unwrap(), "s3cr3t");

        let plain = set(&store, &cipher, project.id, form("NODE_ENV", "preview", false), 10)
            .await
            .unwrap();
        assert_eq!(plain.value, "preview");
    }

    #[tokio::test]
    async fn cap_applies_to_new_keys_only() {
        let store = MemoryStore::new();
        let cipher = SecretCipher::new(TEST_KEY).unwrap();
        let project = store.add_project(project()).await;

        set(&store, &cipher, project.id, form("A", "1", false), 2).await.unwrap();
        set(&store, &cipher, project.id, form("B", "1", false), 2).await.unwrap();
        let err = set(&store, &cipher, project.id, form("C", "1", false), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let replaced = set(&store, &cipher, project.id, form("A", "2", false), 2)
            .await
            .unwrap();
        assert_eq!(replaced.value, "2");
        assert_eq!(store.env_vars(project.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_key_or_unknown_project_is_refused() {
        let store = MemoryStore::new();
        let cipher = SecretCipher::new(TEST_KEY).unwrap();
        let project = store.add_project(project()).await;

        assert!(set(&store, &cipher, project.id, form("BAD-KEY", "1", false), 10)
            .await
            .is_err());
        assert!(set(&store, &cipher, 4242, form("OK", "1", false), 10)
            .await
            .is_err());
    }
}
