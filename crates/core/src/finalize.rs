use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::record::{AttachmentSet, SprintRef, TaskRecord};
use crate::errors::DialogError;
use crate::options::OptionSource;
use crate::ports::{ChatTransport, IssueMapping, MappingStore, UserDirectory};

pub const DEFAULT_ISSUE_TYPE: &str = "Task";
pub const DEFAULT_DESCRIPTION: &str = "No Description Provided";
const MAPPING_ATTEMPTS: u32 = 2;

/// The tracker-facing shape of a completed record. Unset fields are `None` or empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssueRequest {
    pub project: String,
    pub summary: String,
    pub description: String,
    pub issue_type: String,
    pub components: Vec<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub sprint: Option<SprintRef>,
    pub epic: Option<String>,
    pub release: Option<String>,
    pub parent: Option<String>,
    pub story_points: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub labels: Vec<String>,
    #[serde(skip)]
    pub attachments: AttachmentSet,
}

impl IssueRequest {
    pub fn from_record(record: &TaskRecord) -> Result<Self, DialogError> {
        let project = record
            .project
            .clone()
            .ok_or_else(|| DialogError::SubmissionFailed("no project was selected".to_string()))?;
        let summary = record
            .summary
            .clone()
            .filter(|summary| !summary.trim().is_empty())
            .ok_or_else(|| DialogError::SubmissionFailed("the summary is empty".to_string()))?;

        let sub_task = record.is_sub_task();
        Ok(Self {
            project,
            summary,
            description: record.description.clone().unwrap_or_else(|| DEFAULT_DESCRIPTION.into()),
            issue_type: record.task_type.clone().unwrap_or_else(|| DEFAULT_ISSUE_TYPE.into()),
            components: record.components.iter().cloned().collect(),
            assignee: record.assignee.clone(),
            priority: record.priority.clone(),
            // sub-tasks inherit the sprint of their parent
            sprint: if sub_task { None } else { record.sprint.clone() },
            epic: if sub_task || record.parent_issue.is_some() { None } else { record.epic.clone() },
            release: record.release.clone(),
            parent: if sub_task { record.parent_issue.clone() } else { None },
            story_points: record.story_points,
            due_date: record.due_date,
            labels: record.labels.iter().map(|label| label.trim().replace(' ', "-")).collect(),
            attachments: record.attachments.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub key: String,
    pub url: String,
}

/// A created issue and whether its chat-message mapping was stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub issue: IssueRef,
    pub mapping_saved: bool,
}

/// Where the task was requested from; recorded alongside the created issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubmissionOrigin {
    pub chat_id: i64,
    pub message_id: i64,
    pub group_chat_id: Option<i64>,
}

/// Submits completed records and performs the follow-up bookkeeping.
#[derive(Clone)]
pub struct Finalizer {
    source: Arc<dyn OptionSource>,
    mappings: Arc<dyn MappingStore>,
    directory: Arc<dyn UserDirectory>,
    transport: Arc<dyn ChatTransport>,
}

impl Finalizer {
    pub fn new(
        source: Arc<dyn OptionSource>,
        mappings: Arc<dyn MappingStore>,
        directory: Arc<dyn UserDirectory>,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        Self { source, mappings, directory, transport }
    }

    /// One create call, no internal retry. The record is only borrowed so a failure
    /// leaves it intact for a user-initiated retry.
    pub async fn submit(
        &self,
        origin: SubmissionOrigin,
        record: &TaskRecord,
    ) -> Result<Submission, DialogError> {
        let request = IssueRequest::from_record(record)?;
        let issue = self.source.create_issue(&request).await.map_err(|error| {
            warn!(
                event_name = "finalize.create_failed",
                record_id = %record.id,
                error = %error,
                "issue creation failed"
            );
            DialogError::SubmissionFailed(error.to_string())
        })?;

        info!(
            event_name = "finalize.issue_created",
            record_id = %record.id,
            issue_key = %issue.key,
            attachments = request.attachments.len(),
            "issue created"
        );

        let mapping = IssueMapping {
            chat_id: origin.chat_id,
            message_id: origin.message_id,
            issue_key: issue.key.clone(),
            group_chat_id: origin.group_chat_id,
            reply_message_id: None,
            metadata: json!({
                "record_id": record.id.0,
                "project": request.project,
                "issue_type": request.issue_type,
            }),
        };
        let mapping_saved = self.save_mapping(&mapping).await;

        if let Some(assignee) = request.assignee.as_deref() {
            self.notify_assignee(assignee, &request.summary, &issue).await;
        }

        Ok(Submission { issue, mapping_saved })
    }

    /// Saves the mapping, retrying once. The issue already exists, so a failure
    /// is reported to the caller instead of failing the submission.
    async fn save_mapping(&self, mapping: &IssueMapping) -> bool {
        for attempt in 1..=MAPPING_ATTEMPTS {
            match self.mappings.save_mapping(mapping).await {
                Ok(()) => return true,
                Err(error) => warn!(
                    event_name = "finalize.mapping_failed",
                    issue_key = %mapping.issue_key,
                    attempt,
                    error = %error,
                    "issue created but message mapping was not stored"
                ),
            }
        }
        false
    }

    async fn notify_assignee(&self, assignee: &str, summary: &str, issue: &IssueRef) {
        let profile = match self.directory.profile_by_tracker_username(assignee).await {
            Ok(Some(profile)) => profile,
            Ok(None) => return,
            Err(error) => {
                warn!(event_name = "finalize.notify_lookup_failed", error = %error, "assignee lookup failed");
                return;
            }
        };
        let Some(chat_id) = profile.chat_id else {
            return;
        };

        let text = format!("Task\n📄 {summary}\n{} was created for you", issue.url);
        if let Err(error) = self.transport.send_text(chat_id, &text).await {
            warn!(
                event_name = "finalize.notify_failed",
                issue_key = %issue.key,
                error = %error,
                "failed to notify assignee"
            );
        }
    }
}
