use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use taskwire_core::domain::settings::UserProfile;
use taskwire_core::ports::{
    DirectoryError, IssueMapping, MappingStore, MappingStoreError, UserDirectory,
};

#[derive(Default)]
pub struct InMemoryMappingStore {
    mappings: RwLock<HashMap<(i64, i64), IssueMapping>>,
}

impl InMemoryMappingStore {
    pub async fn len(&self) -> usize {
        self.mappings.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn save_mapping(&self, mapping: &IssueMapping) -> Result<(), MappingStoreError> {
        let mut mappings = self.mappings.write().await;
        mappings.insert((mapping.chat_id, mapping.message_id), mapping.clone());
        Ok(())
    }

    async fn issue_key_for_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<String>, MappingStoreError> {
        let mappings = self.mappings.read().await;
        Ok(mappings.get(&(chat_id, message_id)).map(|mapping| mapping.issue_key.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    profiles: RwLock<Vec<UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new(profiles: Vec<UserProfile>) -> Self {
        Self { profiles: RwLock::new(profiles) }
    }

    pub async fn insert(&self, profile: UserProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.retain(|existing| existing.chat_username != profile.chat_username);
        profiles.push(profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile_by_chat_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        let profiles = self.profiles.read().await;
        Ok(profiles.iter().find(|profile| profile.chat_username == username).cloned())
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
