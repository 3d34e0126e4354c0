use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use taskwire_core::ChatTransport;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{
    EventContext, EventDispatcher, HandlerResult, TelegramEnvelope, TelegramEvent,
};
use crate::model::Update;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("update fetch failed: {0}")]
    Fetch(String),
    #[error("callback acknowledgement failed: {0}")]
    Acknowledge(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 8, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Long-poll source of bot updates.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Updates with `update_id >= offset`. `None` means the source is closed for good.
    async fn fetch_updates(&self, offset: Option<i64>) -> Result<Option<Vec<Update>>, PollError>;
    /// Stops the loading indicator on a pressed inline button.
    async fn acknowledge(&self, callback_id: &str) -> Result<(), PollError>;
}

/// Pulls updates, dispatches them one at a time and sends handler replies.
///
/// Consecutive fetch failures back off exponentially; once `max_retries` is exceeded
/// the runner stops without failing the process.
pub struct PollingRunner {
    source: Arc<dyn UpdateSource>,
    replies: Arc<dyn ChatTransport>,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
}

impl PollingRunner {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        replies: Arc<dyn ChatTransport>,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { source, replies, dispatcher, reconnect_policy }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut offset = None;
        let mut failures = 0_u32;

        loop {
            if *shutdown.borrow() {
                info!("polling stopped by shutdown signal");
                return Ok(());
            }

            let fetched = tokio::select! {
                _ = shutdown.changed() => {
                    info!("polling stopped by shutdown signal");
                    return Ok(());
                }
                fetched = self.source.fetch_updates(offset) => fetched,
            };

            match fetched {
                Ok(Some(updates)) => {
                    failures = 0;
                    for update in updates {
                        offset = Some(update.update_id + 1);
                        self.process(update).await;
                    }
                }
                Ok(None) => {
                    info!("update source closed");
                    return Ok(());
                }
                Err(error) => {
                    warn!(
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %error,
                        "telegram update polling failed"
                    );
                    if failures >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "polling retries exhausted; continuing process without crash"
                        );
                        return Ok(());
                    }

                    let delay = self.reconnect_policy.backoff(failures);
                    failures += 1;
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = shutdown.changed() => return Ok(()),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    async fn process(&self, update: Update) {
        let envelope = TelegramEnvelope::from_update(update);
        let correlation_id = envelope.correlation_id();
        let chat_id = envelope.event.chat_id().unwrap_or_default();

        info!(
            event_name = "ingress.telegram.update_received",
            update_id = envelope.update_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %correlation_id,
            chat_id,
            "received telegram update"
        );

        if let TelegramEvent::Callback(callback) = &envelope.event {
            if let Err(error) = self.source.acknowledge(&callback.callback_id).await {
                warn!(
                    event_name = "ingress.telegram.callback_acked",
                    correlation_id = %correlation_id,
                    error = %error,
                    "failed to acknowledge callback query"
                );
            } else {
                debug!(
                    event_name = "ingress.telegram.callback_acked",
                    correlation_id = %correlation_id,
                    "acknowledged callback query"
                );
            }
        }

        let context = EventContext { correlation_id: correlation_id.clone() };
        match self.dispatcher.dispatch(&envelope, &context).await {
            Ok(HandlerResult::Responded { chat_id, text }) => {
                if let Err(error) = self.replies.send_text(chat_id, &text).await {
                    warn!(
                        correlation_id = %correlation_id,
                        chat_id,
                        error = %error,
                        "failed to send handler reply"
                    );
                }
            }
            Ok(HandlerResult::Processed | HandlerResult::Ignored) => {}
            Err(error) => warn!(
                correlation_id = %correlation_id,
                chat_id,
                error = %error,
                "update dispatch failed; continuing polling loop"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use taskwire_core::{ChatTransport, MessageRef, Prompt, TransportError};
    use tokio::sync::{watch, Mutex};

    use super::{PollError, PollingRunner, ReconnectPolicy, UpdateSource};
    use crate::events::EventDispatcher;
    use crate::model::Update;

    type FetchResult = Result<Option<Vec<Update>>, PollError>;

    #[derive(Default)]
    struct ScriptedSource {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        fetches: VecDeque<FetchResult>,
        offsets: Vec<Option<i64>>,
        acknowledgements: Vec<String>,
    }

    impl ScriptedSource {
        fn with_script(fetches: Vec<FetchResult>) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    fetches: fetches.into(),
                    offsets: Vec::new(),
                    acknowledgements: Vec::new(),
                }),
            }
        }

        async fn offsets(&self) -> Vec<Option<i64>> {
            self.state.lock().await.offsets.clone()
        }

        async fn acknowledgements(&self) -> Vec<String> {
            self.state.lock().await.acknowledgements.clone()
        }
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch_updates(&self, offset: Option<i64>) -> FetchResult {
            let mut state = self.state.lock().await;
            state.offsets.push(offset);
            state.fetches.pop_front().unwrap_or(Ok(None))
        }

        async fn acknowledge(&self, callback_id: &str) -> Result<(), PollError> {
            self.state.lock().await.acknowledgements.push(callback_id.to_owned());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Replies {
        texts: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChatTransport for Replies {
        async fn send_prompt(&self, chat_id: i64, _prompt: &Prompt) -> Result<MessageRef, TransportError> {
            Ok(MessageRef { chat_id, message_id: 1 })
        }

        async fn edit_prompt(&self, _message: MessageRef, _prompt: &Prompt) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError> {
            self.texts.lock().await.push((chat_id, text.to_owned()));
            Ok(MessageRef { chat_id, message_id: 2 })
        }

        async fn download_attachment(&self, file_ref: &str) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Download { file_ref: file_ref.to_owned(), reason: "unused".to_owned() })
        }
    }

    fn update(raw: &str) -> Update {
        serde_json::from_str(raw).expect("update json")
    }

    fn no_delay(max_retries: u32) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn advances_offset_and_acknowledges_callbacks() {
        let source = Arc::new(ScriptedSource::with_script(vec![
            Ok(Some(vec![
                update(r#"{ "update_id": 10 }"#),
                update(
                    r#"{ "update_id": 11, "callback_query": { "id": "cb-9", "from": { "id": 7 },
                        "message": { "message_id": 3, "chat": { "id": 5 } }, "data": "done" } }"#,
                ),
            ])),
            Ok(Some(Vec::new())),
            Ok(None),
        ]));
        let replies = Arc::new(Replies::default());
        let runner =
            PollingRunner::new(source.clone(), replies, EventDispatcher::default(), no_delay(2));
        let (_tx, rx) = watch::channel(false);

        runner.run(rx).await.expect("runner should not fail");

        assert_eq!(source.offsets().await, vec![None, Some(12), Some(12)]);
        assert_eq!(source.acknowledgements().await, vec!["cb-9"]);
    }

    #[tokio::test]
    async fn recovers_after_a_failed_fetch() {
        let source = Arc::new(ScriptedSource::with_script(vec![
            Err(PollError::Fetch("network down".to_owned())),
            Ok(Some(vec![update(
                r#"{ "update_id": 4, "message": { "message_id": 1, "chat": { "id": 5 },
                    "from": { "id": 7, "username": "dana" }, "text": "/help" } }"#,
            )])),
            Ok(None),
        ]));
        let replies = Arc::new(Replies::default());
        let mut dispatcher = EventDispatcher::default();
        dispatcher.register(crate::events::CommandHandler::new(NoDialogs));
        let runner = PollingRunner::new(source.clone(), replies.clone(), dispatcher, no_delay(2));
        let (_tx, rx) = watch::channel(false);

        runner.run(rx).await.expect("runner should not fail");

        assert_eq!(source.offsets().await, vec![None, None, Some(5)]);
        let texts = replies.texts.lock().await.clone();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].0, 5);
        assert!(texts[0].1.contains("/create_task"));
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let source = Arc::new(ScriptedSource::with_script(vec![
            Err(PollError::Fetch("fail-1".to_owned())),
            Err(PollError::Fetch("fail-2".to_owned())),
            Err(PollError::Fetch("fail-3".to_owned())),
            Ok(Some(Vec::new())),
        ]));
        let runner = PollingRunner::new(
            source.clone(),
            Arc::new(Replies::default()),
            EventDispatcher::default(),
            no_delay(2),
        );
        let (_tx, rx) = watch::channel(false);

        runner.run(rx).await.expect("runner should degrade gracefully");
        assert_eq!(source.offsets().await.len(), 3);
    }

    #[tokio::test]
    async fn stops_when_shutdown_is_signalled() {
        let source = Arc::new(ScriptedSource::with_script(vec![Ok(Some(Vec::new()))]));
        let runner = PollingRunner::new(
            source.clone(),
            Arc::new(Replies::default()),
            EventDispatcher::default(),
            no_delay(0),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).expect("receiver alive");

        tokio::time::timeout(Duration::from_secs(1), runner.run(rx))
            .await
            .expect("runner returns promptly")
            .expect("runner should not fail");
        assert!(source.offsets().await.is_empty());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = ReconnectPolicy { max_retries: 5, base_delay_ms: 500, max_delay_ms: 3_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(3_000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3_000));
    }

    struct NoDialogs;

    #[async_trait]
    impl crate::events::TaskDialogs for NoDialogs {
        async fn start(
            &self,
            _conversation: taskwire_core::ConversationKey,
            _username: &str,
            _origin: taskwire_core::SubmissionOrigin,
        ) -> Result<(), taskwire_core::ApplicationError> {
            Ok(())
        }

        async fn input(
            &self,
            _conversation: taskwire_core::ConversationKey,
            _input: taskwire_core::DialogInput,
        ) -> Result<(), taskwire_core::ApplicationError> {
            Ok(())
        }

        async fn attachment(
            &self,
            _conversation: taskwire_core::ConversationKey,
            _batch_id: Option<String>,
            _media: taskwire_core::MediaMessage,
        ) -> Result<(), taskwire_core::ApplicationError> {
            Ok(())
        }
    }
}
