use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use taskwire_core::{
    ApplicationError, ConversationKey, DialogError, DialogInput, MediaCategory, MediaMessage,
    SubmissionOrigin, TaskDialogService,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::commands::{decode_callback, help_text, parse_command, CallbackParseError, ChatCommand};
use crate::model::{Message, Update};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelegramEnvelope {
    pub update_id: i64,
    pub event: TelegramEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelegramEvent {
    Command(CommandEvent),
    Message(MessageEvent),
    Callback(CallbackEvent),
    Unsupported { event_type: String },
}

impl TelegramEvent {
    pub fn event_type(&self) -> TelegramEventType {
        match self {
            Self::Command(_) => TelegramEventType::Command,
            Self::Message(_) => TelegramEventType::Message,
            Self::Callback(_) => TelegramEventType::Callback,
            Self::Unsupported { .. } => TelegramEventType::Unsupported,
        }
    }

    pub fn chat_id(&self) -> Option<i64> {
        match self {
            Self::Command(event) => Some(event.sender.chat_id),
            Self::Message(event) => Some(event.sender.chat_id),
            Self::Callback(event) => Some(event.sender.chat_id),
            Self::Unsupported { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TelegramEventType {
    Command,
    Message,
    Callback,
    Unsupported,
}

/// Who sent an update and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sender {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub message_id: i64,
}

impl Sender {
    pub fn conversation(&self) -> ConversationKey {
        ConversationKey { chat_id: self.chat_id, user_id: self.user_id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandEvent {
    pub sender: Sender,
    pub command: ChatCommand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent {
    Text(String),
    Forwarded(String),
    Media { batch_id: Option<String>, media: MediaMessage },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub sender: Sender,
    pub content: MessageContent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    pub callback_id: String,
    pub sender: Sender,
    pub data: String,
}

impl TelegramEnvelope {
    pub fn from_update(update: Update) -> Self {
        let update_id = update.update_id;
        let event = if let Some(callback) = update.callback_query {
            match callback.message {
                Some(message) => TelegramEvent::Callback(CallbackEvent {
                    callback_id: callback.id,
                    sender: Sender {
                        chat_id: message.chat.id,
                        user_id: callback.from.id,
                        username: callback.from.username,
                        message_id: message.message_id,
                    },
                    data: callback.data.unwrap_or_default(),
                }),
                None => unsupported("inline_callback"),
            }
        } else if let Some(message) = update.message {
            message_event(message)
        } else {
            unsupported("unknown")
        };

        Self { update_id, event }
    }

    pub fn correlation_id(&self) -> String {
        format!("update-{}", self.update_id)
    }
}

fn unsupported(event_type: &str) -> TelegramEvent {
    TelegramEvent::Unsupported { event_type: event_type.to_owned() }
}

fn message_event(message: Message) -> TelegramEvent {
    let Some(from) = message.from.as_ref().filter(|user| !user.is_bot) else {
        return unsupported("bot_message");
    };
    let sender = Sender {
        chat_id: message.chat.id,
        user_id: from.id,
        username: from.username.clone(),
        message_id: message.message_id,
    };

    if let Some(media) = media_of(&message) {
        let content = MessageContent::Media { batch_id: message.media_group_id.clone(), media };
        return TelegramEvent::Message(MessageEvent { sender, content });
    }

    let Some(text) = message.text.clone().filter(|text| !text.trim().is_empty()) else {
        return unsupported("empty_message");
    };
    if message.is_forwarded() {
        return TelegramEvent::Message(MessageEvent {
            sender,
            content: MessageContent::Forwarded(text),
        });
    }
    match parse_command(&text) {
        Some(command) => TelegramEvent::Command(CommandEvent { sender, command }),
        None => TelegramEvent::Message(MessageEvent { sender, content: MessageContent::Text(text) }),
    }
}

/// Classifies the message's attachment. Photos use the largest size Telegram offers.
fn media_of(message: &Message) -> Option<MediaMessage> {
    let (category, file_ref, file_name) = if let Some(sizes) = &message.photo {
        let largest = sizes.iter().max_by_key(|size| u64::from(size.width) * u64::from(size.height))?;
        (MediaCategory::Image, largest.file_id.clone(), None)
    } else if let Some(video) = &message.video {
        (MediaCategory::Video, video.file_id.clone(), video.file_name.clone())
    } else if let Some(audio) = message.audio.as_ref().or(message.voice.as_ref()) {
        (MediaCategory::Audio, audio.file_id.clone(), audio.file_name.clone())
    } else if let Some(document) = &message.document {
        (MediaCategory::Document, document.file_id.clone(), document.file_name.clone())
    } else {
        return None;
    };

    Some(MediaMessage { message_id: message.message_id, category, file_ref, file_name })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// A plain reply for the runner to send to `chat_id`.
    Responded { chat_id: i64, text: String },
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Callback(#[from] CallbackParseError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// What the handlers need from the dialog layer.
#[async_trait]
pub trait TaskDialogs: Send + Sync {
    async fn start(
        &self,
        conversation: ConversationKey,
        username: &str,
        origin: SubmissionOrigin,
    ) -> Result<(), ApplicationError>;
    async fn input(
        &self,
        conversation: ConversationKey,
        input: DialogInput,
    ) -> Result<(), ApplicationError>;
    async fn attachment(
        &self,
        conversation: ConversationKey,
        batch_id: Option<String>,
        media: MediaMessage,
    ) -> Result<(), ApplicationError>;
}

#[async_trait]
impl TaskDialogs for Arc<TaskDialogService> {
    async fn start(
        &self,
        conversation: ConversationKey,
        username: &str,
        origin: SubmissionOrigin,
    ) -> Result<(), ApplicationError> {
        TaskDialogService::start(self, conversation, username, origin).await.map(|_| ())
    }

    async fn input(
        &self,
        conversation: ConversationKey,
        input: DialogInput,
    ) -> Result<(), ApplicationError> {
        self.handle_input(conversation, input).await.map(|_| ())
    }

    async fn attachment(
        &self,
        conversation: ConversationKey,
        batch_id: Option<String>,
        media: MediaMessage,
    ) -> Result<(), ApplicationError> {
        self.handle_attachment(conversation, batch_id, media).await
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> TelegramEventType;
    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<TelegramEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Registers the command, message and callback handlers against one dialog layer.
pub fn default_dispatcher<S>(dialogs: S) -> EventDispatcher
where
    S: TaskDialogs + Clone + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(CommandHandler::new(dialogs.clone()));
    dispatcher.register(MessageHandler::new(dialogs.clone()));
    dispatcher.register(CallbackHandler::new(dialogs));
    dispatcher
}

const NO_SESSION_HINT: &str = "There is no task in progress. Start one with /create_task.";

/// Turns a dialog failure into the reply shown in chat.
fn failure_reply(
    error: ApplicationError,
    chat_id: i64,
    ctx: &EventContext,
) -> HandlerResult {
    let text = match error {
        ApplicationError::Dialog(DialogError::NoActiveSession) => NO_SESSION_HINT.to_owned(),
        ApplicationError::Dialog(DialogError::UnknownUser(username)) => format!(
            "{username} is not registered for task creation. Ask an administrator to add you."
        ),
        ApplicationError::Dialog(DialogError::InvalidUserInput(reason)) => {
            format!("Invalid input: {reason}")
        }
        other => {
            warn!(
                event_name = "ingress.telegram.dialog_failed",
                correlation_id = %ctx.correlation_id,
                chat_id,
                error = %other,
                "dialog operation failed"
            );
            let interface = other.into_interface(ctx.correlation_id.clone());
            format!("{} (ref {})", interface.user_message(), interface.correlation_id())
        }
    };
    HandlerResult::Responded { chat_id, text }
}

pub struct CommandHandler<S> {
    dialogs: S,
}

impl<S> CommandHandler<S>
where
    S: TaskDialogs,
{
    pub fn new(dialogs: S) -> Self {
        Self { dialogs }
    }
}

#[async_trait]
impl<S> EventHandler for CommandHandler<S>
where
    S: TaskDialogs + 'static,
{
    fn event_type(&self) -> TelegramEventType {
        TelegramEventType::Command
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Command(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let sender = &event.sender;

        let result = match &event.command {
            ChatCommand::CreateTask => {
                let Some(username) = sender.username.as_deref() else {
                    return Ok(HandlerResult::Responded {
                        chat_id: sender.chat_id,
                        text: "Set a Telegram username to create tasks.".to_owned(),
                    });
                };
                let origin = SubmissionOrigin {
                    chat_id: sender.chat_id,
                    message_id: sender.message_id,
                    group_chat_id: (sender.chat_id < 0).then_some(sender.chat_id),
                };
                self.dialogs.start(sender.conversation(), username, origin).await
            }
            ChatCommand::Cancel => self.dialogs.input(sender.conversation(), DialogInput::Cancel).await,
            ChatCommand::Help => {
                return Ok(HandlerResult::Responded { chat_id: sender.chat_id, text: help_text() })
            }
            ChatCommand::Unknown(name) => {
                debug!(command = %name, "ignoring unknown command");
                return Ok(HandlerResult::Ignored);
            }
        };

        Ok(match result {
            Ok(()) => HandlerResult::Processed,
            Err(error) => failure_reply(error, sender.chat_id, ctx),
        })
    }
}

pub struct MessageHandler<S> {
    dialogs: S,
}

impl<S> MessageHandler<S>
where
    S: TaskDialogs,
{
    pub fn new(dialogs: S) -> Self {
        Self { dialogs }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: TaskDialogs + 'static,
{
    fn event_type(&self) -> TelegramEventType {
        TelegramEventType::Message
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let conversation = event.sender.conversation();

        let result = match &event.content {
            MessageContent::Text(text) => {
                self.dialogs.input(conversation, DialogInput::Text(text.clone())).await
            }
            MessageContent::Forwarded(text) => {
                self.dialogs.input(conversation, DialogInput::ForwardedText(text.clone())).await
            }
            MessageContent::Media { batch_id, media } => {
                self.dialogs.attachment(conversation, batch_id.clone(), media.clone()).await
            }
        };

        Ok(match result {
            Ok(()) => HandlerResult::Processed,
            // Group chats carry plenty of messages that are not meant for the bot.
            Err(ApplicationError::Dialog(DialogError::NoActiveSession)) => HandlerResult::Ignored,
            Err(error) => failure_reply(error, event.sender.chat_id, ctx),
        })
    }
}

pub struct CallbackHandler<S> {
    dialogs: S,
}

impl<S> CallbackHandler<S>
where
    S: TaskDialogs,
{
    pub fn new(dialogs: S) -> Self {
        Self { dialogs }
    }
}

#[async_trait]
impl<S> EventHandler for CallbackHandler<S>
where
    S: TaskDialogs + 'static,
{
    fn event_type(&self) -> TelegramEventType {
        TelegramEventType::Callback
    }

    async fn handle(
        &self,
        envelope: &TelegramEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let TelegramEvent::Callback(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let input = decode_callback(&event.data)?;
        Ok(match self.dialogs.input(event.sender.conversation(), input).await {
            Ok(()) => HandlerResult::Processed,
            Err(error) => failure_reply(error, event.sender.chat_id, ctx),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use taskwire_core::{
        ApplicationError, ConversationKey, DialogError, DialogInput, MediaCategory, MediaMessage,
        SubmissionOrigin, TrackerError,
    };
    use tokio::sync::Mutex;

    use super::{
        default_dispatcher, EventContext, EventDispatcher, HandlerResult, MessageContent,
        TaskDialogs, TelegramEnvelope, TelegramEvent, NO_SESSION_HINT,
    };
    use crate::commands::ChatCommand;
    use crate::model::Update;

    #[derive(Clone, Debug, PartialEq, Eq)]
    enum Call {
        Start(ConversationKey, String, SubmissionOrigin),
        Input(ConversationKey, DialogInput),
        Attachment(ConversationKey, Option<String>, MediaMessage),
    }

    #[derive(Clone, Default)]
    struct RecordingDialogs {
        calls: Arc<Mutex<Vec<Call>>>,
        failure: Arc<Mutex<Option<ApplicationError>>>,
    }

    impl RecordingDialogs {
        async fn failing_with(self, error: ApplicationError) -> Self {
            *self.failure.lock().await = Some(error);
            self
        }

        async fn calls(&self) -> Vec<Call> {
            self.calls.lock().await.clone()
        }

        async fn record(&self, call: Call) -> Result<(), ApplicationError> {
            self.calls.lock().await.push(call);
            match self.failure.lock().await.clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl TaskDialogs for RecordingDialogs {
        async fn start(
            &self,
            conversation: ConversationKey,
            username: &str,
            origin: SubmissionOrigin,
        ) -> Result<(), ApplicationError> {
            self.record(Call::Start(conversation, username.to_owned(), origin)).await
        }

        async fn input(
            &self,
            conversation: ConversationKey,
            input: DialogInput,
        ) -> Result<(), ApplicationError> {
            self.record(Call::Input(conversation, input)).await
        }

        async fn attachment(
            &self,
            conversation: ConversationKey,
            batch_id: Option<String>,
            media: MediaMessage,
        ) -> Result<(), ApplicationError> {
            self.record(Call::Attachment(conversation, batch_id, media)).await
        }
    }

    fn envelope(raw: &str) -> TelegramEnvelope {
        let update: Update = serde_json::from_str(raw).expect("update json");
        TelegramEnvelope::from_update(update)
    }

    const CONVERSATION: ConversationKey = ConversationKey { chat_id: -100, user_id: 7 };

    fn text_update(text: &str) -> String {
        format!(
            r#"{{ "update_id": 1, "message": {{ "message_id": 40, "chat": {{ "id": -100, "type": "group" }},
                "from": {{ "id": 7, "username": "dana" }}, "text": {text:?} }} }}"#
        )
    }

    #[test]
    fn classifies_updates() {
        let command = envelope(&text_update("/create_task@taskwire_bot"));
        assert!(matches!(
            command.event,
            TelegramEvent::Command(ref event) if event.command == ChatCommand::CreateTask
        ));
        assert_eq!(command.correlation_id(), "update-1");

        let photo = envelope(
            r#"{ "update_id": 2, "message": { "message_id": 41, "chat": { "id": -100 },
                "from": { "id": 7 }, "media_group_id": "g1",
                "photo": [ { "file_id": "thumb", "width": 90, "height": 60 },
                           { "file_id": "full", "width": 1280, "height": 960 } ] } }"#,
        );
        let TelegramEvent::Message(event) = photo.event else { panic!("expected a message") };
        assert_eq!(
            event.content,
            MessageContent::Media {
                batch_id: Some("g1".to_owned()),
                media: MediaMessage {
                    message_id: 41,
                    category: MediaCategory::Image,
                    file_ref: "full".to_owned(),
                    file_name: None,
                },
            }
        );

        let forwarded = envelope(
            r#"{ "update_id": 3, "message": { "message_id": 42, "chat": { "id": 5 },
                "from": { "id": 7 }, "forward_date": 1700000000, "text": "Broken login\nsteps" } }"#,
        );
        let TelegramEvent::Message(event) = forwarded.event else { panic!("expected a message") };
        assert_eq!(event.content, MessageContent::Forwarded("Broken login\nsteps".to_owned()));

        let from_bot = envelope(
            r#"{ "update_id": 4, "message": { "message_id": 43, "chat": { "id": 5 },
                "from": { "id": 8, "is_bot": true }, "text": "hello" } }"#,
        );
        assert_eq!(
            from_bot.event,
            TelegramEvent::Unsupported { event_type: "bot_message".to_owned() }
        );
    }

    #[tokio::test]
    async fn create_task_starts_a_dialog_with_the_message_origin() {
        let dialogs = RecordingDialogs::default();
        let dispatcher = default_dispatcher(dialogs.clone());
        assert_eq!(dispatcher.handler_count(), 3);

        let result = dispatcher
            .dispatch(&envelope(&text_update("/create_task")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(
            dialogs.calls().await,
            vec![Call::Start(
                CONVERSATION,
                "dana".to_owned(),
                SubmissionOrigin { chat_id: -100, message_id: 40, group_chat_id: Some(-100) },
            )]
        );
    }

    #[tokio::test]
    async fn callbacks_decode_to_dialog_inputs() {
        let dialogs = RecordingDialogs::default();
        let dispatcher = default_dispatcher(dialogs.clone());
        let callback = envelope(
            r#"{ "update_id": 9, "callback_query": { "id": "cb-1", "from": { "id": 7 },
                "message": { "message_id": 50, "chat": { "id": -100 } }, "data": "tgl|2" } }"#,
        );

        let result =
            dispatcher.dispatch(&callback, &EventContext::default()).await.expect("dispatch");

        assert_eq!(result, HandlerResult::Processed);
        assert_eq!(dialogs.calls().await, vec![Call::Input(CONVERSATION, DialogInput::Toggle(2))]);
    }

    #[tokio::test]
    async fn malformed_callback_is_a_dispatch_error() {
        let dispatcher = default_dispatcher(RecordingDialogs::default());
        let callback = envelope(
            r#"{ "update_id": 9, "callback_query": { "id": "cb-1", "from": { "id": 7 },
                "message": { "message_id": 50, "chat": { "id": -100 } }, "data": "sel|nope" } }"#,
        );

        assert!(dispatcher.dispatch(&callback, &EventContext::default()).await.is_err());
    }

    #[tokio::test]
    async fn stray_group_text_without_a_session_is_ignored() {
        let dialogs = RecordingDialogs::default()
            .failing_with(ApplicationError::Dialog(DialogError::NoActiveSession))
            .await;
        let dispatcher = default_dispatcher(dialogs.clone());

        let result = dispatcher
            .dispatch(&envelope(&text_update("lunch?")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
        assert_eq!(
            dialogs.calls().await,
            vec![Call::Input(CONVERSATION, DialogInput::Text("lunch?".to_owned()))]
        );
    }

    #[tokio::test]
    async fn cancel_without_a_session_explains_itself() {
        let dialogs = RecordingDialogs::default()
            .failing_with(ApplicationError::Dialog(DialogError::NoActiveSession))
            .await;
        let dispatcher = default_dispatcher(dialogs);

        let result = dispatcher
            .dispatch(&envelope(&text_update("/cancel")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(
            result,
            HandlerResult::Responded { chat_id: -100, text: NO_SESSION_HINT.to_owned() }
        );
    }

    #[tokio::test]
    async fn tracker_failures_reply_with_a_reference() {
        let dialogs = RecordingDialogs::default()
            .failing_with(ApplicationError::Dialog(DialogError::LookupUnavailable(
                TrackerError::Transport("timeout".to_owned()),
            )))
            .await;
        let dispatcher = default_dispatcher(dialogs);
        let ctx = EventContext { correlation_id: "update-1".to_owned() };

        let result =
            dispatcher.dispatch(&envelope(&text_update("/create_task")), &ctx).await.expect("dispatch");

        let HandlerResult::Responded { text, .. } = result else { panic!("expected a reply") };
        assert!(text.contains("temporarily unavailable"));
        assert!(text.ends_with("(ref update-1)"));
    }

    #[tokio::test]
    async fn help_is_answered_without_touching_dialogs() {
        let dialogs = RecordingDialogs::default();
        let dispatcher = default_dispatcher(dialogs.clone());

        let result = dispatcher
            .dispatch(&envelope(&text_update("/help")), &EventContext::default())
            .await
            .expect("dispatch");

        assert!(matches!(result, HandlerResult::Responded { ref text, .. } if text.contains("/create_task")));
        assert!(dialogs.calls().await.is_empty());
    }

    #[tokio::test]
    async fn dispatcher_returns_ignored_when_no_handler_registered() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(&envelope(&text_update("hello")), &EventContext::default())
            .await
            .expect("dispatch");

        assert_eq!(result, HandlerResult::Ignored);
    }
}
