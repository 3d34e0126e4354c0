//! Per-conversation dialog sessions and the glue between the record builder,
//! the media aggregator, the finalizer and the chat transport.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::domain::field::FieldName;
use crate::domain::record::{AttachmentSet, TaskRecord};
use crate::errors::{ApplicationError, DialogError};
use crate::finalize::{Finalizer, Submission, SubmissionOrigin};
use crate::flows::engine::{DialogSession, RecordBuilder};
use crate::flows::states::{DialogInput, DialogState, Prompt, TransitionOutcome};
use crate::media::{
    AggregatorSettings, BatchOwner, BatchSink, MediaAggregator, MediaAggregatorHandle,
    MediaMessage,
};
use crate::ports::{ChatTransport, ConversationKey, MessageRef, UserDirectory};

struct ActiveDialog {
    session: DialogSession,
    origin: SubmissionOrigin,
    /// The last prompt message, edited in place for multi-select toggles.
    prompt_message: Option<MessageRef>,
}

type SessionSlot = Arc<Mutex<ActiveDialog>>;

/// Owns every in-flight dialog. Conversations never share state; each one is
/// serialized behind its own lock.
pub struct TaskDialogService {
    builder: RecordBuilder,
    finalizer: Finalizer,
    transport: Arc<dyn ChatTransport>,
    directory: Arc<dyn UserDirectory>,
    media: MediaAggregatorHandle,
    sessions: RwLock<HashMap<ConversationKey, SessionSlot>>,
}

struct SessionSink(Weak<TaskDialogService>);

#[async_trait]
impl BatchSink for SessionSink {
    async fn batch_ready(&self, owner: BatchOwner, batch_id: String, attachments: AttachmentSet) {
        match self.0.upgrade() {
            Some(service) => service.attach_batch(owner, batch_id, attachments).await,
            None => info!(
                event_name = "dialog.media.discarded",
                batch_id = %batch_id,
                "dialog service is gone, discarding media batch"
            ),
        }
    }

    async fn single_ready(&self, owner: BatchOwner, result: Result<AttachmentSet, DialogError>) {
        if let Some(service) = self.0.upgrade() {
            service.attach_single(owner, result).await;
        }
    }
}

impl TaskDialogService {
    /// Builds the service and starts its media aggregator. Requires a Tokio runtime.
    pub fn spawn(
        builder: RecordBuilder,
        finalizer: Finalizer,
        transport: Arc<dyn ChatTransport>,
        directory: Arc<dyn UserDirectory>,
        media_settings: AggregatorSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|service| {
            let sink = Arc::new(SessionSink(service.clone()));
            let (media, _task) =
                MediaAggregator::spawn(media_settings, Arc::clone(&transport), sink);
            Self {
                builder,
                finalizer,
                transport,
                directory,
                media,
                sessions: RwLock::new(HashMap::new()),
            }
        })
    }

    /// Starts a new task dialog, replacing any dialog already open in this conversation.
    pub async fn start(
        &self,
        conversation: ConversationKey,
        chat_username: &str,
        origin: SubmissionOrigin,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let profile = self
            .directory
            .profile_by_chat_username(chat_username)
            .await?
            .ok_or_else(|| DialogError::UnknownUser(chat_username.to_string()))?;

        let record = TaskRecord::new(profile.settings);
        let replaced = self.sessions.write().await.remove(&conversation);
        if let Some(replaced) = replaced {
            let replaced = replaced.lock().await;
            self.abandon_media(conversation, &replaced.session.record).await;
        }

        let mut active =
            ActiveDialog { session: DialogSession::new(record), origin, prompt_message: None };
        info!(
            event_name = "dialog.started",
            chat_id = conversation.chat_id,
            user_id = conversation.user_id,
            record_id = %active.session.record.id,
            "task dialog started"
        );

        let outcome = self.builder.start(&mut active.session).await;
        let slot = Arc::new(Mutex::new(active));
        self.sessions.write().await.insert(conversation, Arc::clone(&slot));

        let mut active = slot.lock().await;
        self.settle(conversation, &mut active, outcome).await
    }

    /// Feeds one decoded user action to the conversation's dialog.
    pub async fn handle_input(
        &self,
        conversation: ConversationKey,
        input: DialogInput,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let slot = self.slot(conversation).await?;
        let mut active = slot.lock().await;

        if active.session.state == DialogState::Field(FieldName::Attachments) {
            let owner = owner_of(conversation, &active.session.record);
            if closes_upload(&input, "done") {
                let pending = self.media.flush(owner).await.map_err(|error| {
                    ApplicationError::Integration(error.to_string())
                })?;
                active.session.record.attachments.merge(pending);
            } else if closes_upload(&input, "skip") {
                self.abandon_media(conversation, &active.session.record).await;
            }
        }
        if input == DialogInput::Cancel {
            self.abandon_media(conversation, &active.session.record).await;
        }

        let outcome = self.builder.apply(&mut active.session, input).await;
        self.settle(conversation, &mut active, outcome).await
    }

    pub async fn cancel(
        &self,
        conversation: ConversationKey,
    ) -> Result<TransitionOutcome, ApplicationError> {
        self.handle_input(conversation, DialogInput::Cancel).await
    }

    /// Accepts an attachment. Batched media is grouped by the aggregator; a single
    /// item is downloaded by it right away and acknowledged when stored. Either
    /// way a later "done" waits for the download.
    pub async fn handle_attachment(
        &self,
        conversation: ConversationKey,
        batch_id: Option<String>,
        message: MediaMessage,
    ) -> Result<(), ApplicationError> {
        let slot = self.slot(conversation).await?;
        let active = slot.lock().await;
        if active.session.state != DialogState::Field(FieldName::Attachments) {
            return Err(DialogError::InvalidUserInput(
                "attachments are only accepted at the attachments step".to_string(),
            )
            .into());
        }
        let owner = owner_of(conversation, &active.session.record);

        // queued while the session is locked, so a "done" behind it flushes this item too
        let queued = match batch_id {
            Some(batch_id) => self.media.append(owner, batch_id, message).await,
            None => self.media.single(owner, message).await,
        };
        queued.map_err(|error| ApplicationError::Integration(error.to_string()))
    }

    /// The state of the conversation's dialog, if one is open.
    pub async fn state(&self, conversation: ConversationKey) -> Option<DialogState> {
        let slot = self.sessions.read().await.get(&conversation).cloned()?;
        let active = slot.lock().await;
        Some(active.session.state.clone())
    }

    /// A copy of the record being built in the conversation.
    pub async fn record(&self, conversation: ConversationKey) -> Option<TaskRecord> {
        let slot = self.sessions.read().await.get(&conversation).cloned()?;
        let active = slot.lock().await;
        Some(active.session.record.clone())
    }

    async fn slot(&self, conversation: ConversationKey) -> Result<SessionSlot, DialogError> {
        self.sessions.read().await.get(&conversation).cloned().ok_or(DialogError::NoActiveSession)
    }

    /// Locks the session for `owner` if it is still waiting for attachments on the same record.
    async fn waiting_slot(&self, owner: &BatchOwner) -> Option<SessionSlot> {
        let slot = self.sessions.read().await.get(&owner.conversation).cloned()?;
        let waiting = {
            let active = slot.lock().await;
            active.session.record.id == owner.record_id
                && active.session.state == DialogState::Field(FieldName::Attachments)
        };
        waiting.then_some(slot)
    }

    async fn attach_single(&self, owner: BatchOwner, result: Result<AttachmentSet, DialogError>) {
        let attachments = match result {
            Ok(attachments) => attachments,
            Err(error) => {
                warn!(
                    event_name = "dialog.media.download_failed",
                    record_id = %owner.record_id,
                    error = %error,
                    "single attachment could not be downloaded"
                );
                self.notify(
                    owner.conversation,
                    "That attachment could not be downloaded, please send it again.",
                )
                .await;
                return;
            }
        };
        let Some(slot) = self.waiting_slot(&owner).await else {
            info!(
                event_name = "dialog.media.discarded",
                record_id = %owner.record_id,
                "attachment arrived after the dialog moved on"
            );
            return;
        };
        let mut active = slot.lock().await;
        if active.session.state != DialogState::Field(FieldName::Attachments) {
            return;
        }
        active.session.record.attachments.merge(attachments);
        let text = format!(
            "Attachment received ({} so far). Send more, or type \"done\".",
            active.session.record.attachments.len()
        );
        drop(active);
        self.notify(owner.conversation, &text).await;
    }

    async fn attach_batch(&self, owner: BatchOwner, batch_id: String, attachments: AttachmentSet) {
        let Some(slot) = self.waiting_slot(&owner).await else {
            info!(
                event_name = "dialog.media.discarded",
                batch_id = %batch_id,
                record_id = %owner.record_id,
                "media batch arrived after the dialog moved on"
            );
            return;
        };
        let mut active = slot.lock().await;
        if active.session.state != DialogState::Field(FieldName::Attachments) {
            return;
        }

        let received = attachments.len();
        active.session.record.attachments.merge(attachments);
        self.notify(owner.conversation, &format!("Received {received} attachments.")).await;

        let outcome = self.builder.apply(&mut active.session, DialogInput::Done).await;
        if let Err(error) = self.settle(owner.conversation, &mut active, outcome).await {
            warn!(
                event_name = "dialog.media.settle_failed",
                batch_id = %batch_id,
                error = %error,
                "failed to continue the dialog after a media batch"
            );
        }
    }

    /// Shows the outcome, submits when the record is complete, and drops finished sessions.
    async fn settle(
        &self,
        conversation: ConversationKey,
        active: &mut ActiveDialog,
        outcome: TransitionOutcome,
    ) -> Result<TransitionOutcome, ApplicationError> {
        self.present(conversation, active, &outcome).await?;
        let outcome = if outcome.submission_ready() {
            self.submit(conversation, active).await?
        } else {
            outcome
        };

        match outcome.to {
            DialogState::Cancelled => self.close(conversation, None).await,
            DialogState::Completed => {
                self.close(conversation, Some("Okay, no more tasks for now.")).await
            }
            _ => {}
        }
        Ok(outcome)
    }

    async fn submit(
        &self,
        conversation: ConversationKey,
        active: &mut ActiveDialog,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let outcome = match self.finalizer.submit(active.origin, &active.session.record).await {
            Ok(Submission { issue, mapping_saved }) => {
                let mut text = format!("Task {} created: {}", issue.key, issue.url);
                if !mapping_saved {
                    text.push_str("\nReplies to your original message will not be linked to this task.");
                }
                self.notify(conversation, &text).await;
                self.builder.submission_succeeded(&mut active.session)
            }
            Err(error) => self.builder.submission_failed(&mut active.session, &error.to_string()),
        };
        active.prompt_message = None;
        self.present(conversation, active, &outcome).await?;
        Ok(outcome)
    }

    async fn present(
        &self,
        conversation: ConversationKey,
        active: &mut ActiveDialog,
        outcome: &TransitionOutcome,
    ) -> Result<(), ApplicationError> {
        let notices: Vec<String> = outcome.notices.iter().map(|notice| notice.text()).collect();
        let Some(prompt) = outcome.prompt.as_ref() else {
            if !notices.is_empty() {
                self.transport.send_text(conversation.chat_id, &notices.join("\n")).await?;
            }
            return Ok(());
        };

        if outcome.refreshes_prompt && notices.is_empty() {
            if let Some(message) = active.prompt_message {
                self.transport.edit_prompt(message, prompt).await?;
                return Ok(());
            }
        }

        let shown = with_notices(prompt, &notices);
        let message = self.transport.send_prompt(conversation.chat_id, &shown).await?;
        active.prompt_message = Some(message);
        Ok(())
    }

    async fn close(&self, conversation: ConversationKey, farewell: Option<&str>) {
        self.sessions.write().await.remove(&conversation);
        if let Some(text) = farewell {
            self.notify(conversation, text).await;
        }
        info!(
            event_name = "dialog.closed",
            chat_id = conversation.chat_id,
            user_id = conversation.user_id,
            "task dialog closed"
        );
    }

    async fn abandon_media(&self, conversation: ConversationKey, record: &TaskRecord) {
        if let Err(error) = self.media.abandon(owner_of(conversation, record)).await {
            warn!(event_name = "dialog.media.abandon_failed", error = %error, "could not drop pending media");
        }
    }

    async fn notify(&self, conversation: ConversationKey, text: &str) {
        if let Err(error) = self.transport.send_text(conversation.chat_id, text).await {
            warn!(
                event_name = "dialog.notify_failed",
                chat_id = conversation.chat_id,
                error = %error,
                "failed to send message"
            );
        }
    }
}

fn owner_of(conversation: ConversationKey, record: &TaskRecord) -> BatchOwner {
    BatchOwner { conversation, record_id: record.id.clone() }
}

fn closes_upload(input: &DialogInput, word: &str) -> bool {
    match input {
        DialogInput::Done => word == "done",
        DialogInput::Skip => word == "skip",
        DialogInput::Text(text) => text.trim().eq_ignore_ascii_case(word),
        _ => false,
    }
}

fn with_notices(prompt: &Prompt, notices: &[String]) -> Prompt {
    if notices.is_empty() {
        return prompt.clone();
    }
    let mut shown = prompt.clone();
    shown.text = format!("{}\n\n{}", notices.join("\n"), prompt.text);
    shown
}
