//! Telegram Bot API client
//!
//! Only the handful of methods the bot needs: `getFile` and the file download for
//! incoming photos, `sendMessage` for summaries, `setWebhook`/`deleteWebhook` and
//! `getUpdates` for the two delivery modes. Summaries go to the group's General topic.

use std::time::Duration;

use async_trait::async_trait;
use audience_core::config::TelegramConfig;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

const SEND_RETRIES: usize = 3;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Telegram API error ({code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("Missing bot token (TELEGRAM_BOT_TOKEN not set)")]
    MissingToken,

    #[error("File {0} has no download path")]
    MissingFilePath(String),
}

// Request URLs carry the bot token.
impl From<reqwest::Error> for TelegramError {
    fn from(e: reqwest::Error) -> Self {
        TelegramError::Http(e.without_url())
    }
}

/// Where summaries are delivered.
#[async_trait]
pub trait SummarySink: Send + Sync {
    async fn send_summary(&self, text: &str) -> anyhow::Result<()>;
}

// ============================================================================
// Bot API types (subset)
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub is_topic_message: bool,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    pub reply_to_message: Option<Box<Message>>,
    pub forum_topic_created: Option<ForumTopicCreated>,
}

impl Message {
    /// Telegram sends every resolution of a photo; the largest is the original.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo
            .iter()
            .max_by_key(|p| (p.width as u64 * p.height as u64, p.file_size.unwrap_or(0)))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForumTopicCreated {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

// ============================================================================
// TelegramClient
// ============================================================================

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    api_base: String,
    token: String,
    group_id: i64,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(api_base: &str, token: String, group_id: i64) -> Result<Self, TelegramError> {
        if token.is_empty() {
            return Err(TelegramError::MissingToken);
        }
        // No client-wide timeout: getUpdates long-polls, each call sets its own.
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            group_id,
        })
    }

    /// Build from config, token from `TELEGRAM_BOT_TOKEN`.
    pub fn from_config(config: &TelegramConfig) -> Result<Self, TelegramError> {
        let token = std::env::var(TOKEN_ENV).unwrap_or_default();
        Self::new(&config.api_base, token, config.group_id)
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T, TelegramError> {
        let response: ApiResponse<T> = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        match (response.ok, response.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(TelegramError::Api {
                code: response.error_code,
                description: response
                    .description
                    .unwrap_or_else(|| format!("{} returned no result", method)),
            }),
        }
    }

    pub async fn get_file(&self, file_id: &str) -> Result<TelegramFile, TelegramError> {
        self.call(
            "getFile",
            serde_json::json!({ "file_id": file_id }),
            Duration::from_secs(30),
        )
        .await
    }

    pub async fn download_file(&self, file_path: &str) -> Result<Bytes, TelegramError> {
        let url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(60))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }

    /// Resolve and download a photo by file id.
    pub async fn download_photo(&self, file_id: &str) -> Result<Bytes, TelegramError> {
        let file = self.get_file(file_id).await?;
        let path = file
            .file_path
            .ok_or_else(|| TelegramError::MissingFilePath(file.file_id.clone()))?;
        self.download_file(&path).await
    }

    async fn send_message_once(&self, text: &str) -> Result<(), TelegramError> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                serde_json::json!({ "chat_id": self.group_id, "text": text }),
                Duration::from_secs(30),
            )
            .await?;
        Ok(())
    }

    /// Post to the group's General topic.
    pub async fn send_message(&self, text: &str) -> Result<(), TelegramError> {
        let retry_strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(SEND_RETRIES);

        Retry::spawn(retry_strategy, || self.send_message_once(text)).await
    }

    pub async fn set_webhook(&self, url: &str) -> Result<(), TelegramError> {
        let _: bool = self
            .call(
                "setWebhook",
                serde_json::json!({ "url": url, "allowed_updates": ["message"] }),
                Duration::from_secs(30),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self
            .call("deleteWebhook", serde_json::json!({}), Duration::from_secs(30))
            .await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_seconds` server-side.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_seconds: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            serde_json::json!({
                "offset": offset,
                "timeout": timeout_seconds,
                "allowed_updates": ["message"],
            }),
            Duration::from_secs(timeout_seconds + 10),
        )
        .await
    }
}

#[async_trait]
impl SummarySink for TelegramClient {
    async fn send_summary(&self, text: &str) -> anyhow::Result<()> {
        self.send_message(text).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TelegramClient {
        TelegramClient::new(&server.uri(), "TEST:TOKEN".to_string(), -100200).unwrap()
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let result = TelegramClient::new("https://api.telegram.org", String::new(), 1);
        assert!(matches!(result, Err(TelegramError::MissingToken)));
    }

    #[test]
    fn test_largest_photo_is_selected() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "message_id": 7,
            "chat": {"id": -100200},
            "photo": [
                {"file_id": "small", "width": 90, "height": 160},
                {"file_id": "large", "width": 720, "height": 1280},
                {"file_id": "medium", "width": 320, "height": 568}
            ]
        }))
        .unwrap();
        assert_eq!(message.largest_photo().unwrap().file_id, "large");
        assert!(!message.is_topic_message);
    }

    #[tokio::test]
    async fn test_download_photo_resolves_path_then_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST:TOKEN/getFile"))
            .and(body_partial_json(serde_json::json!({"file_id": "abc"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"file_id": "abc", "file_path": "photos/file_1.jpg"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/botTEST:TOKEN/photos/file_1.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .mount(&server)
            .await;

        let bytes = client(&server).download_photo("abc").await.unwrap();
        assert_eq!(bytes.as_ref(), &[1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_missing_file_path_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST:TOKEN/getFile"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"file_id": "abc"}
            })))
            .mount(&server)
            .await;

        let result = client(&server).download_photo("abc").await;
        assert!(matches!(result, Err(TelegramError::MissingFilePath(_))));
    }

    #[tokio::test]
    async fn test_send_message_targets_group() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST:TOKEN/sendMessage"))
            .and(body_partial_json(serde_json::json!({"chat_id": -100200, "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": {"message_id": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send_message("hello").await.unwrap();
    }

    #[tokio::test]
    async fn test_api_error_carries_description() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST:TOKEN/setWebhook"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: bad webhook"
            })))
            .mount(&server)
            .await;

        match client(&server).set_webhook("http://x/webhook").await {
            Err(TelegramError::Api { code, description }) => {
                assert_eq!(code, Some(400));
                assert!(description.contains("bad webhook"));
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_errors_do_not_expose_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/botTEST:TOKEN/photos/gone.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).download_file("photos/gone.jpg").await.unwrap_err();
        assert!(matches!(err, TelegramError::Http(_)));
        assert!(!err.to_string().contains("TEST:TOKEN"));
        assert!(!format!("{:?}", err).contains("TEST:TOKEN"));

        let unreachable = TelegramClient::new("http://127.0.0.1:9", "123:SECRET".to_string(), 1).unwrap();
        let err = unreachable.get_updates(None, 0).await.unwrap_err();
        assert!(!err.to_string().contains("123:SECRET"));
        assert!(!format!("{:?}", unreachable).contains("123:SECRET"));
    }

    #[tokio::test]
    async fn test_get_updates_parses_photo_messages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST:TOKEN/getUpdates"))
            .and(body_partial_json(serde_json::json!({"offset": 11})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "result": [{
                    "update_id": 11,
                    "message": {
                        "message_id": 5,
                        "chat": {"id": -100200},
                        "message_thread_id": 3,
                        "is_topic_message": true,
                        "photo": [{"file_id": "p", "width": 10, "height": 10}]
                    }
                }]
            })))
            .mount(&server)
            .await;

        let updates = client(&server).get_updates(Some(11), 0).await.unwrap();
        assert_eq!(updates.len(), 1);
        let message = updates[0].message.as_ref().unwrap();
        assert_eq!(message.message_thread_id, Some(3));
        assert_eq!(message.photo.len(), 1);
    }
}
