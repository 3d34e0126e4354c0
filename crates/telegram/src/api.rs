//! Bot API client over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use taskwire_core::config::TelegramConfig;
use taskwire_core::{ChatTransport, MessageRef, Prompt, TransportError};
use thiserror::Error;
use tracing::debug;

use crate::keyboard::render_prompt;
use crate::model::{ApiResponse, File, Message, Update, User};
use crate::polling::{PollError, UpdateSource};

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const POLL_GRACE_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum TelegramApiError {
    #[error("telegram http client could not be built: {0}")]
    Client(String),
    #[error("telegram request `{method}` failed: {source}")]
    Http { method: String, source: reqwest::Error },
    #[error("telegram rejected `{method}` ({code}): {description}")]
    Api { method: String, code: i64, description: String },
    #[error("telegram response for `{0}` carried no result")]
    MissingResult(String),
}

impl From<TelegramApiError> for TransportError {
    fn from(value: TelegramApiError) -> Self {
        match value {
            TelegramApiError::Api { .. } | TelegramApiError::MissingResult(_) => {
                Self::Api(value.to_string())
            }
            TelegramApiError::Client(_) | TelegramApiError::Http { .. } => {
                Self::Request(value.to_string())
            }
        }
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
    poll_timeout_secs: u64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + POLL_GRACE_SECS))
            .build()
            .map_err(|error| TelegramApiError::Client(error.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim().trim_end_matches('/').to_owned(),
            token: config.bot_token.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token.expose_secret())
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token.expose_secret())
    }

    async fn call<T>(&self, method: &str, body: &Value) -> Result<T, TelegramApiError>
    where
        T: DeserializeOwned,
    {
        // The URL embeds the bot token, so it is stripped from transport errors.
        let http_error = |source: reqwest::Error| TelegramApiError::Http {
            method: method.to_owned(),
            source: source.without_url(),
        };
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(http_error)?;
        let payload: ApiResponse<T> = response.json().await.map_err(http_error)?;
        unwrap_response(method, payload)
    }

    /// Verifies the token; used at startup.
    pub async fn get_me(&self) -> Result<User, TelegramApiError> {
        self.call("getMe", &json!({})).await
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, TelegramApiError> {
        self.call("getUpdates", &updates_request(offset, self.poll_timeout_secs)).await
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), TelegramApiError> {
        let _: bool =
            self.call("answerCallbackQuery", &json!({ "callback_query_id": callback_id })).await?;
        Ok(())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let download_error = |reason: String| TransportError::Download {
            file_ref: file_id.to_owned(),
            reason,
        };

        let file: File = self
            .call("getFile", &json!({ "file_id": file_id }))
            .await
            .map_err(|error| download_error(error.to_string()))?;
        let file_path = file
            .file_path
            .ok_or_else(|| download_error("telegram returned no file path".to_owned()))?;

        let response = self
            .http
            .get(self.file_url(&file_path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| download_error(error.without_url().to_string()))?;
        let bytes =
            response.bytes().await.map_err(|error| download_error(error.without_url().to_string()))?;
        debug!(file_id, size = bytes.len(), "downloaded telegram file");
        Ok(bytes.to_vec())
    }
}

fn unwrap_response<T>(method: &str, payload: ApiResponse<T>) -> Result<T, TelegramApiError> {
    if !payload.ok {
        return Err(TelegramApiError::Api {
            method: method.to_owned(),
            code: payload.error_code.unwrap_or_default(),
            description: payload.description.unwrap_or_else(|| "unknown error".to_owned()),
        });
    }
    payload.result.ok_or_else(|| TelegramApiError::MissingResult(method.to_owned()))
}

fn updates_request(offset: Option<i64>, timeout_secs: u64) -> Value {
    let mut body = json!({
        "timeout": timeout_secs,
        "allowed_updates": ["message", "callback_query"],
    });
    if let Some(offset) = offset {
        body["offset"] = json!(offset);
    }
    body
}

fn prompt_request(chat_id: i64, message_id: Option<i64>, prompt: &Prompt) -> Value {
    let mut body = json!(render_prompt(prompt));
    body["chat_id"] = json!(chat_id);
    if let Some(message_id) = message_id {
        body["message_id"] = json!(message_id);
    }
    body
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_prompt(&self, chat_id: i64, prompt: &Prompt) -> Result<MessageRef, TransportError> {
        let message: Message = self.call("sendMessage", &prompt_request(chat_id, None, prompt)).await?;
        Ok(MessageRef { chat_id: message.chat.id, message_id: message.message_id })
    }

    async fn edit_prompt(&self, message: MessageRef, prompt: &Prompt) -> Result<(), TransportError> {
        let body = prompt_request(message.chat_id, Some(message.message_id), prompt);
        let _: Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TransportError> {
        let message: Message =
            self.call("sendMessage", &json!({ "chat_id": chat_id, "text": text })).await?;
        Ok(MessageRef { chat_id: message.chat.id, message_id: message.message_id })
    }

    async fn download_attachment(&self, file_ref: &str) -> Result<Vec<u8>, TransportError> {
        self.download(file_ref).await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch_updates(&self, offset: Option<i64>) -> Result<Option<Vec<Update>>, PollError> {
        self.get_updates(offset)
            .await
            .map(Some)
            .map_err(|error| PollError::Fetch(error.to_string()))
    }

    async fn acknowledge(&self, callback_id: &str) -> Result<(), PollError> {
        self.answer_callback_query(callback_id)
            .await
            .map_err(|error| PollError::Acknowledge(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use taskwire_core::config::TelegramConfig;
    use taskwire_core::flows::PromptControls;
    use taskwire_core::{OptionItem, Prompt, TransportError};

    use super::{
        prompt_request, unwrap_response, updates_request, TelegramApiError, TelegramClient,
    };
    use crate::model::ApiResponse;

    fn config() -> TelegramConfig {
        TelegramConfig {
            bot_token: "123456:ABC-secret".to_owned().into(),
            api_base_url: "https://api.telegram.org/".to_owned(),
            poll_timeout_secs: 25,
        }
    }

    #[test]
    fn builds_method_and_file_urls_from_the_token() {
        let client = TelegramClient::new(&config()).expect("client");
        assert_eq!(
            client.method_url("getUpdates"),
            "https://api.telegram.org/bot123456:ABC-secret/getUpdates"
        );
        assert_eq!(
            client.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123456:ABC-secret/photos/file_1.jpg"
        );
    }

    #[test]
    fn updates_request_carries_offset_only_when_known() {
        let first = updates_request(None, 25);
        assert_eq!(first["timeout"], 25);
        assert!(first.get("offset").is_none());

        let next = updates_request(Some(42), 25);
        assert_eq!(next["offset"], 42);
    }

    #[test]
    fn prompt_request_embeds_the_inline_keyboard() {
        let prompt = Prompt::text("Select the priority:")
            .with_options(vec![OptionItem::plain("High")])
            .with_controls(PromptControls { skip: true, ..PromptControls::default() });

        let body = prompt_request(-100, Some(7), &prompt);
        assert_eq!(body["chat_id"], -100);
        assert_eq!(body["message_id"], 7);
        assert_eq!(body["text"], "Select the priority:");
        assert_eq!(body["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "sel|0");
    }

    #[test]
    fn api_failures_become_transport_errors() {
        let payload: ApiResponse<bool> =
            serde_json::from_str(r#"{ "ok": false, "error_code": 400, "description": "chat not found" }"#)
                .expect("decode");
        let error = unwrap_response("sendMessage", payload).expect_err("api failure");
        assert!(matches!(error, TelegramApiError::Api { code: 400, .. }));

        let transport = TransportError::from(error);
        assert!(matches!(transport, TransportError::Api(ref message) if message.contains("chat not found")));
    }

    #[test]
    fn ok_without_result_is_reported() {
        let payload: ApiResponse<bool> = serde_json::from_str(r#"{ "ok": true }"#).expect("decode");
        assert!(matches!(
            unwrap_response("answerCallbackQuery", payload),
            Err(TelegramApiError::MissingResult(_))
        ));
    }
}
