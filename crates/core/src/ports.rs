//! Collaborators the dialog talks to. Adapters live in the `db`, `telegram`
//! and `server` crates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::settings::UserProfile;
use crate::flows::states::Prompt;

/// One user's dialog in one chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub chat_id: i64,
    pub user_id: i64,
}

/// A chat message the bot sent, addressable for later edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("chat request failed: {0}")]
    Request(String),
    #[error("chat api rejected the call: {0}")]
    Api(String),
    #[error("file `{file_ref}` could not be downloaded: {reason}")]
    Download { file_ref: String, reason: String },
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_prompt(&self, chat_id: i64, prompt: &Prompt) -> Result<MessageRef, TransportError>;
    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt) -> Result<(), TransportError>;
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError>;
    async fn download_attachment(&self, file_ref: &str) -> Result<Vec<u8>, TransportError>;
}

/// Links the chat message that started a task to the issue it produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueMapping {
    pub chat_id: i64,
    pub message_id: i64,
    pub issue_key: String,
    pub group_chat_id: Option<i64>,
    pub reply_message_id: Option<i64>,
    pub metadata: Value,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MappingStoreError {
    #[error("mapping store unavailable: {0}")]
    Unavailable(String),
    #[error("mapping could not be encoded: {0}")]
    Encode(String),
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Upserts by `(chat_id, message_id)`.
    async fn save_mapping(&self, mapping: &IssueMapping) -> Result<(), MappingStoreError>;
    async fn issue_key_for_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<String>, MappingStoreError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
    #[error("user directory is malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile_by_chat_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError>;
    async fn profile_by_tracker_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError>;
}
