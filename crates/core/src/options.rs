//! Tracker read/write boundary.
//!
//! Every read returns a flat list of [`OptionItem`]s so the dialog can render any
//! field the same way. [`CachedOptionSource`] layers per-category TTLs over an
//! adapter; failed reads are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::finalize::{IssueRef, IssueRequest};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: String,
}

impl OptionItem {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into() }
    }

    /// An option whose label and value are the same string.
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self { label: value.clone(), value }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("tracker request failed: {0}")]
    Transport(String),
    #[error("tracker returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("tracker response could not be decoded: {0}")]
    Decode(String),
    #[error("tracker rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait OptionSource: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_components(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_assignees(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn board_for_project(&self, project: &str) -> Result<Option<u64>, TrackerError>;
    /// Only sprints that are active or in the future.
    async fn list_sprints(&self, board_id: u64) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_epics(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    /// Only unreleased versions.
    async fn list_versions(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_priorities(&self) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_labels(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_issue_types(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn list_stories(
        &self,
        project: &str,
        epic: Option<&str>,
    ) -> Result<Vec<OptionItem>, TrackerError>;
    async fn search_users(&self, query: &str) -> Result<Vec<OptionItem>, TrackerError>;
    async fn create_issue(&self, request: &IssueRequest) -> Result<IssueRef, TrackerError>;
}

#[async_trait]
impl<T> OptionSource for Arc<T>
where
    T: OptionSource + ?Sized,
{
    async fn list_projects(&self) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_projects().await
    }
    async fn list_components(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_components(project).await
    }
    async fn list_assignees(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_assignees(project).await
    }
    async fn board_for_project(&self, project: &str) -> Result<Option<u64>, TrackerError> {
        (**self).board_for_project(project).await
    }
    async fn list_sprints(&self, board_id: u64) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_sprints(board_id).await
    }
    async fn list_epics(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_epics(project).await
    }
    async fn list_versions(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_versions(project).await
    }
    async fn list_priorities(&self) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_priorities().await
    }
    async fn list_labels(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_labels(project).await
    }
    async fn list_issue_types(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_issue_types(project).await
    }
    async fn list_stories(
        &self,
        project: &str,
        epic: Option<&str>,
    ) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).list_stories(project, epic).await
    }
    async fn search_users(&self, query: &str) -> Result<Vec<OptionItem>, TrackerError> {
        (**self).search_users(query).await
    }
    async fn create_issue(&self, request: &IssueRequest) -> Result<IssueRef, TrackerError> {
        (**self).create_issue(request).await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheTtls {
    pub projects: Duration,
    pub components: Duration,
    pub assignees: Duration,
    pub board: Duration,
    pub sprints: Duration,
    pub epics: Duration,
    pub versions: Duration,
    pub priorities: Duration,
    pub labels: Duration,
    pub issue_types: Duration,
    pub user_search: Duration,
}

const HOUR: u64 = 60 * 60;

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            projects: Duration::from_secs(48 * HOUR),
            components: Duration::from_secs(2 * HOUR),
            assignees: Duration::from_secs(2 * HOUR),
            board: Duration::from_secs(48 * HOUR),
            sprints: Duration::from_secs(8 * HOUR),
            epics: Duration::from_secs(72 * HOUR),
            versions: Duration::from_secs(48 * HOUR),
            priorities: Duration::from_secs(1200 * HOUR),
            labels: Duration::from_secs(2 * HOUR),
            issue_types: Duration::from_secs(4 * HOUR),
            user_search: Duration::from_secs(HOUR),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Projects,
    Components(String),
    Assignees(String),
    Board(String),
    Sprints(u64),
    Epics(String),
    Versions(String),
    Priorities,
    Labels(String),
    IssueTypes(String),
    UserSearch(String),
}

#[derive(Clone, Debug)]
enum CachedValue {
    Options(Vec<OptionItem>),
    Board(Option<u64>),
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: CachedValue,
    expires_at: Instant,
}

/// TTL cache in front of any [`OptionSource`]. Stories and writes pass through.
pub struct CachedOptionSource<S> {
    inner: S,
    ttls: CacheTtls,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl<S> CachedOptionSource<S>
where
    S: OptionSource,
{
    pub fn new(inner: S, ttls: CacheTtls) -> Self {
        Self { inner, ttls, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn invalidate_all(&self) {
        self.entries.lock().await.clear();
    }

    async fn cached(&self, key: &CacheKey) -> Option<CachedValue> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Inserts `value` and evicts every expired entry, so user-search keys do not pile up.
    async fn store(&self, key: CacheKey, value: CachedValue, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key, CacheEntry { value, expires_at: now + ttl });
    }

    async fn options<F>(
        &self,
        key: CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Vec<OptionItem>, TrackerError>
    where
        F: std::future::Future<Output = Result<Vec<OptionItem>, TrackerError>>,
    {
        if let Some(CachedValue::Options(options)) = self.cached(&key).await {
            debug!(event_name = "tracker.cache.hit", key = ?key, "serving cached options");
            return Ok(options);
        }

        let options = fetch.await?;
        self.store(key, CachedValue::Options(options.clone()), ttl).await;
        Ok(options)
    }
}

#[async_trait]
impl<S> OptionSource for CachedOptionSource<S>
where
    S: OptionSource,
{
    async fn list_projects(&self) -> Result<Vec<OptionItem>, TrackerError> {
        self.options(CacheKey::Projects, self.ttls.projects, self.inner.list_projects()).await
    }

    async fn list_components(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Components(project.to_string());
        self.options(key, self.ttls.components, self.inner.list_components(project)).await
    }

    async fn list_assignees(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Assignees(project.to_string());
        self.options(key, self.ttls.assignees, self.inner.list_assignees(project)).await
    }

    async fn board_for_project(&self, project: &str) -> Result<Option<u64>, TrackerError> {
        let key = CacheKey::Board(project.to_string());
        if let Some(CachedValue::Board(board)) = self.cached(&key).await {
            return Ok(board);
        }
        let board = self.inner.board_for_project(project).await?;
        self.store(key, CachedValue::Board(board), self.ttls.board).await;
        Ok(board)
    }

    async fn list_sprints(&self, board_id: u64) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Sprints(board_id);
        self.options(key, self.ttls.sprints, self.inner.list_sprints(board_id)).await
    }

    async fn list_epics(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Epics(project.to_string());
        self.options(key, self.ttls.epics, self.inner.list_epics(project)).await
    }

    async fn list_versions(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Versions(project.to_string());
        self.options(key, self.ttls.versions, self.inner.list_versions(project)).await
    }

    async fn list_priorities(&self) -> Result<Vec<OptionItem>, TrackerError> {
        self.options(CacheKey::Priorities, self.ttls.priorities, self.inner.list_priorities()).await
    }

    async fn list_labels(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::Labels(project.to_string());
        self.options(key, self.ttls.labels, self.inner.list_labels(project)).await
    }

    async fn list_issue_types(&self, project: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::IssueTypes(project.to_string());
        self.options(key, self.ttls.issue_types, self.inner.list_issue_types(project)).await
    }

    async fn list_stories(
        &self,
        project: &str,
        epic: Option<&str>,
    ) -> Result<Vec<OptionItem>, TrackerError> {
        self.inner.list_stories(project, epic).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<OptionItem>, TrackerError> {
        let key = CacheKey::UserSearch(query.trim().to_ascii_lowercase());
        self.options(key, self.ttls.user_search, self.inner.search_users(query)).await
    }

    async fn create_issue(&self, request: &IssueRequest) -> Result<IssueRef, TrackerError> {
        self.inner.create_issue(request).await
    }
}
