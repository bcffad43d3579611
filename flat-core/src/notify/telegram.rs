use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::listing::Listing;
use crate::tracker::NoveltyTracker;

use super::{format_listing_message, format_no_updates_message, NotificationSink};

const MAX_ATTEMPTS: u8 = 10;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Minimal Telegram Bot API client: just what the notifier and the command
/// listener need.
#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl TelegramApi {
    pub fn new(client: Client, api_base: &str, token: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), NotifyError> {
        let body = SendMessage {
            chat_id,
            text,
            disable_web_page_preview: false,
        };
        let _: serde_json::Value = self.call("sendMessage", &body, None).await?;
        Ok(())
    }

    /// Long-polls for updates; `timeout_secs` is how long Telegram may hold the request.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, NotifyError> {
        let body = GetUpdates {
            offset,
            timeout: timeout_secs,
            allowed_updates: ["message"],
        };
        let request_timeout = Duration::from_secs(timeout_secs + 10);
        self.call("getUpdates", &body, Some(request_timeout)).await
    }

    async fn call<B, T>(
        &self,
        method: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, NotifyError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.endpoint, method))
            .json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();
        let parsed: ApiResponse<T> = response.json().await?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(NotifyError::Api(
                parsed
                    .description
                    .unwrap_or_else(|| format!("{method} failed with HTTP {status}")),
            )),
        }
    }
}

/// Sends every listing to every subscriber as its own message.
pub struct TelegramSink {
    api: TelegramApi,
    tracker: NoveltyTracker,
    interval: Duration,
    max_retries: u8,
    retry_base: Duration,
}

impl TelegramSink {
    pub fn new(api: TelegramApi, tracker: NoveltyTracker, interval: Duration) -> Self {
        Self {
            api,
            tracker,
            interval,
            max_retries: 3,
            retry_base: Duration::from_millis(500),
        }
    }

    /// Total attempts per message, clamped to `1..=MAX_ATTEMPTS`.
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.clamp(1, MAX_ATTEMPTS);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    async fn deliver(&self, chat_id: i64, text: &str) {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            match self.api.send_message(chat_id, text).await {
                Ok(()) => return,
                Err(err) if attempt < self.max_retries => {
                    debug!(chat_id, attempt, error = %err, "delivery failed, retrying");
                    tokio::time::sleep(backoff(self.retry_base, attempt)).await;
                }
                Err(err) => {
                    warn!(chat_id, error = %err, "giving up on message delivery");
                    return;
                }
            }
        }
    }
}

/// Delay before retry number `attempt`: `base`, `2 * base`, `4 * base`, ...
fn backoff(base: Duration, attempt: u8) -> Duration {
    let factor = 1u32
        .checked_shl(u32::from(attempt.saturating_sub(1)))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn broadcast(&self, listings: &[Listing]) {
        let chats = self.tracker.subscribers().await;
        if chats.is_empty() || listings.is_empty() {
            return;
        }
        let texts: Vec<String> = listings.iter().map(format_listing_message).collect();
        for chat_id in chats {
            for text in &texts {
                self.deliver(chat_id, text).await;
            }
        }
    }

    async fn notify_no_updates(&self, empty_cycles: u64) {
        let chats = self.tracker.subscribers().await;
        if chats.is_empty() {
            return;
        }
        let text = format_no_updates_message(empty_cycles, self.interval);
        for chat_id in chats {
            self.deliver(chat_id, &text).await;
        }
    }
}
