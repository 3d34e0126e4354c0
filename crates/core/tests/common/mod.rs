#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use taskwire_core::domain::settings::{UserProfile, UserSettings};
use taskwire_core::finalize::{Finalizer, IssueRef, IssueRequest};
use taskwire_core::flows::{FixedClock, Prompt, RecordBuilder};
use taskwire_core::options::{OptionItem, OptionSource, TrackerError};
use taskwire_core::ports::{
    ChatTransport, DirectoryError, IssueMapping, MappingStore, MappingStoreError, MessageRef,
    TransportError, UserDirectory,
};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
}

fn items(values: &[&str]) -> Vec<OptionItem> {
    values.iter().map(|value| OptionItem::plain(*value)).collect()
}

/// Tracker contents served by [`FakeTracker`].
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub projects: Vec<OptionItem>,
    pub components: Vec<OptionItem>,
    pub assignees: Vec<OptionItem>,
    pub board: Option<u64>,
    pub sprints: Vec<OptionItem>,
    pub epics: Vec<OptionItem>,
    pub versions: Vec<OptionItem>,
    pub priorities: Vec<OptionItem>,
    pub labels: Vec<OptionItem>,
    pub issue_types: Vec<OptionItem>,
    pub stories: Vec<OptionItem>,
    pub users: HashMap<String, Vec<OptionItem>>,
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            projects: vec![OptionItem::new("Engineering", "ENG"), OptionItem::new("Operations", "OPS")],
            components: items(&["Backend", "Frontend"]),
            assignees: items(&["alice", "bob"]),
            board: Some(7),
            sprints: vec![OptionItem::new("Sprint 12", "77")],
            epics: vec![OptionItem::new("Login revamp", "ENG-1")],
            versions: items(&["1.0"]),
            priorities: items(&["High", "Low"]),
            labels: items(&["backend", "urgent"]),
            issue_types: items(&["Task", "Sub-task", "Story"]),
            stories: vec![OptionItem::new("Sign-in page", "ENG-5")],
            users: HashMap::from([(
                "carol".to_string(),
                vec![OptionItem::new("Carol Diaz", "carol")],
            )]),
        }
    }
}

pub struct FakeTracker {
    pub catalog: Catalog,
    calls: Mutex<Vec<String>>,
    created: Mutex<Vec<IssueRequest>>,
    create_failures: AtomicUsize,
}

impl FakeTracker {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            create_failures: AtomicUsize::new(0),
        }
    }

    pub fn standard() -> Self {
        Self::new(Catalog::standard())
    }

    /// The next `count` create calls fail.
    pub fn failing_creates(self, count: usize) -> Self {
        self.create_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|call| call == name)
    }

    pub fn created(&self) -> Vec<IssueRequest> {
        self.created.lock().expect("created lock").clone()
    }

    fn record(&self, name: &str) {
        self.calls.lock().expect("calls lock").push(name.to_string());
    }
}

#[async_trait]
impl OptionSource for FakeTracker {
    async fn list_projects(&self) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("projects");
        Ok(self.catalog.projects.clone())
    }

    async fn list_components(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("components");
        Ok(self.catalog.components.clone())
    }

    async fn list_assignees(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("assignees");
        Ok(self.catalog.assignees.clone())
    }

    async fn board_for_project(&self, _project: &str) -> Result<Option<u64>, TrackerError> {
        self.record("board");
        Ok(self.catalog.board)
    }

    async fn list_sprints(&self, _board_id: u64) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("sprints");
        Ok(self.catalog.sprints.clone())
    }

    async fn list_epics(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("epics");
        Ok(self.catalog.epics.clone())
    }

    async fn list_versions(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("versions");
        Ok(self.catalog.versions.clone())
    }

    async fn list_priorities(&self) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("priorities");
        Ok(self.catalog.priorities.clone())
    }

    async fn list_labels(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("labels");
        Ok(self.catalog.labels.clone())
    }

    async fn list_issue_types(&self, _project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("issue_types");
        Ok(self.catalog.issue_types.clone())
    }

    async fn list_stories(
        &self,
        _project: &str,
        _epic: Option<&str>,
    ) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("stories");
        Ok(self.catalog.stories.clone())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<OptionItem>, TrackerError> {
        self.record("search_users");
        Ok(self.catalog.users.get(query).cloned().unwrap_or_default())
    }

    async fn create_issue(&self, request: &IssueRequest) -> Result<IssueRef, TrackerError> {
        self.record("create_issue");
        let remaining = self.create_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.create_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TrackerError::Status { status: 502, body: "bad gateway".to_string() });
        }

        let mut created = self.created.lock().expect("created lock");
        created.push(request.clone());
        let key = format!("{}-{}", request.project, 100 + created.len());
        Ok(IssueRef { url: format!("https://tracker.example/browse/{key}"), key })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Prompt { chat_id: i64, message_id: i64, prompt: Prompt },
    Edit { message: MessageRef, prompt: Prompt },
    Text { chat_id: i64, text: String },
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    next_message: AtomicI64,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.sent().into_iter().rev().find_map(|sent| match sent {
            Sent::Prompt { prompt, .. } | Sent::Edit { prompt, .. } => Some(prompt),
            Sent::Text { .. } => None,
        })
    }

    fn message_id(&self) -> i64 {
        self.next_message.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_prompt(&self, chat_id: i64, prompt: &Prompt) -> Result<MessageRef, TransportError> {
        let message_id = self.message_id();
        self.sent.lock().expect("sent lock").push(Sent::Prompt {
            chat_id,
            message_id,
            prompt: prompt.clone(),
        });
        Ok(MessageRef { chat_id, message_id })
    }

    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt) -> Result<(), TransportError> {
        self.sent.lock().expect("sent lock").push(Sent::Edit { message, prompt: prompt.clone() });
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError> {
        let message_id = self.message_id();
        self.sent.lock().expect("sent lock").push(Sent::Text { chat_id, text: text.to_string() });
        Ok(MessageRef { chat_id, message_id })
    }

    async fn download_attachment(&self, file_ref: &str) -> Result<Vec<u8>, TransportError> {
        if file_ref.starts_with("slow") {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
        if file_ref.starts_with("broken") {
            return Err(TransportError::Download {
                file_ref: file_ref.to_string(),
                reason: "file expired".to_string(),
            });
        }
        Ok(file_ref.as_bytes().to_vec())
    }
}

#[derive(Default)]
pub struct MemoryMappings {
    saved: Mutex<Vec<IssueMapping>>,
    save_failures: AtomicUsize,
    save_attempts: AtomicUsize,
}

impl MemoryMappings {
    pub fn saved(&self) -> Vec<IssueMapping> {
        self.saved.lock().expect("mappings lock").clone()
    }

    /// The next `count` saves fail.
    pub fn fail_next_saves(&self, count: usize) {
        self.save_failures.store(count, Ordering::SeqCst);
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MappingStore for MemoryMappings {
    async fn save_mapping(&self, mapping: &IssueMapping) -> Result<(), MappingStoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .save_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MappingStoreError::Unavailable("database is locked".to_string()));
        }
        let mut saved = self.saved.lock().expect("mappings lock");
        saved.retain(|existing| {
            (existing.chat_id, existing.message_id) != (mapping.chat_id, mapping.message_id)
        });
        saved.push(mapping.clone());
        Ok(())
    }

    async fn issue_key_for_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<String>, MappingStoreError> {
        Ok(self
            .saved()
            .into_iter()
            .find(|mapping| mapping.chat_id == chat_id && mapping.message_id == message_id)
            .map(|mapping| mapping.issue_key))
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    profiles: Vec<UserProfile>,
}

impl MemoryDirectory {
    pub fn with(profiles: Vec<UserProfile>) -> Self {
        Self { profiles }
    }
}

pub fn profile(chat_username: &str, settings: UserSettings) -> UserProfile {
    UserProfile {
        chat_username: chat_username.to_string(),
        tracker_username: None,
        chat_id: None,
        settings,
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn profile_by_chat_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self.profiles.iter().find(|profile| profile.chat_username == username).cloned())
    }

    async fn profile_by_tracker_username(
        &self,
        username: &str,
    ) -> Result<Option<UserProfile>, DirectoryError> {
        Ok(self
            .profiles
            .iter()
            .find(|profile| profile.tracker_username.as_deref() == Some(username))
            .cloned())
    }
}

pub fn builder(tracker: &Arc<FakeTracker>) -> RecordBuilder {
    RecordBuilder::new(
        Arc::clone(tracker) as Arc<dyn OptionSource>,
        Arc::new(FixedClock(today())),
    )
}

pub struct Harness {
    pub tracker: Arc<FakeTracker>,
    pub transport: Arc<RecordingTransport>,
    pub mappings: Arc<MemoryMappings>,
    pub directory: Arc<MemoryDirectory>,
}

impl Harness {
    pub fn new(tracker: FakeTracker, profiles: Vec<UserProfile>) -> Self {
        Self {
            tracker: Arc::new(tracker),
            transport: Arc::new(RecordingTransport::default()),
            mappings: Arc::new(MemoryMappings::default()),
            directory: Arc::new(MemoryDirectory::with(profiles)),
        }
    }

    pub fn builder(&self) -> RecordBuilder {
        builder(&self.tracker)
    }

    pub fn finalizer(&self) -> Finalizer {
        Finalizer::new(
            Arc::clone(&self.tracker) as Arc<dyn OptionSource>,
            Arc::clone(&self.mappings) as Arc<dyn MappingStore>,
            Arc::clone(&self.directory) as Arc<dyn UserDirectory>,
            Arc::clone(&self.transport) as Arc<dyn ChatTransport>,
        )
    }
}
