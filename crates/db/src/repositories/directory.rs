use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

use taskwire_core::domain::settings::UserProfile;
use taskwire_core::ports::{DirectoryError, UserDirectory};

use super::RepositoryError;

#[derive(Debug, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: Vec<UserProfile>,
}

/// User profiles read from a JSON document of the form `{ "users": [ ... ] }`.
///
/// Chat usernames match case-insensitively and a leading `@` is ignored.
pub struct JsonFileUserDirectory {
    path: PathBuf,
    profiles: RwLock<Vec<UserProfile>>,
}

impl JsonFileUserDirectory {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let profiles = read_profiles(&path).await?;
        info!(
            event_name = "directory.loaded",
            path = %path.display(),
            users = profiles.len(),
            "user directory loaded"
        );
        Ok(Self { path, profiles: RwLock::new(profiles) })
    }

    /// Re-reads the file. The previous profiles stay in place when the file is unreadable.
    pub async fn reload(&self) -> Result<usize, RepositoryError> {
        let profiles = read_profiles(&self.path).await?;
        let count = profiles.len();
        *self.profiles.write().await = profiles;
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

async fn read_profiles(path: &Path) -> Result<Vec<UserProfile>, RepositoryError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let document: UsersDocument = serde_json::from_str(&raw)
        .map_err(|error| RepositoryError::Decode(format!("{}: {error}", path.display())))?;
    Ok(document.users)
}

fn normalize(username: &str) -> &str {
    username.trim().trim_start_matches('@')
}

#[async_trait]
impl UserDirectory for JsonFileUserDirectory {
    async fn profile_by_chat_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        let wanted = normalize(username);
        let profiles = self.profiles.read().await;
        Ok(profiles
            .iter()
            .find(|profile| normalize(&profile.chat_username).eq_ignore_ascii_case(wanted))
            .cloned())
    }

    async fn profile_by_tracker_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .iter()
            .find(|profile| profile.tracker_username.as_deref() == Some(username))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use taskwire_core::domain::field::FieldName;
    use taskwire_core::ports::UserDirectory;

    use super::JsonFileUserDirectory;
    use crate::repositories::RepositoryError;

    const USERS: &str = r#"{
        "users": [
            {
                "chat_username": "@Dana",
                "tracker_username": "dana",
                "chat_id": 1001,
                "fields": {
                    "sprint": { "active": false },
                    "priority": { "fixed_values": ["High", "Low"] }
                }
            },
            { "chat_username": "eli" }
        ]
    }"#;

    #[tokio::test]
    async fn loads_profiles_with_field_settings() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("users.json");
        fs::write(&path, USERS).expect("write users");

        let directory = JsonFileUserDirectory::load(&path).await.expect("load");
        assert_eq!(directory.len().await, 2);

        let dana = directory
            .profile_by_chat_username("dana")
            .await
            .expect("lookup")
            .expect("dana is configured");
        assert_eq!(dana.chat_id, Some(1001));
        assert!(!dana.settings.is_active(FieldName::Sprint));
        assert_eq!(
            dana.settings.fixed_values(FieldName::Priority),
            Some(["High".to_string(), "Low".to_string()].as_slice())
        );

        let by_tracker =
            directory.profile_by_tracker_username("dana").await.expect("lookup").expect("found");
        assert_eq!(by_tracker.chat_username, "@Dana");

        let eli = directory.profile_by_chat_username("@eli").await.expect("lookup").expect("eli");
        assert!(eli.settings.is_active(FieldName::Sprint));
    }

    #[tokio::test]
    async fn malformed_document_is_a_decode_error() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("users.json");
        fs::write(&path, "{ \"users\": 3 }").expect("write users");

        let error = JsonFileUserDirectory::load(&path).await.err().expect("decode failure");
        assert!(matches!(error, RepositoryError::Decode(_)));
    }

    #[tokio::test]
    async fn reload_picks_up_new_users() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("users.json");
        fs::write(&path, r#"{ "users": [] }"#).expect("write users");
        let directory = JsonFileUserDirectory::load(&path).await.expect("load");
        assert!(directory.is_empty().await);

        fs::write(&path, USERS).expect("rewrite users");
        assert_eq!(directory.reload().await.expect("reload"), 2);
        assert!(directory.profile_by_chat_username("eli").await.expect("lookup").is_some());
    }
}
