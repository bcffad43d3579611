use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::error::NotifyError;
use crate::scheduler::PollerHandle;
use crate::tracker::NoveltyTracker;

use super::telegram::{TelegramApi, Update};

const SUBSCRIBED_REPLY: &str = "Subscribed. New listings will be sent to this chat.";
const UNSUBSCRIBED_REPLY: &str = "Unsubscribed. No more listings will be sent here.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
}

impl Command {
    /// `/start`, `/stop` and their `@botname` forms; anything else is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.split('@').next().unwrap_or(word);
        match name {
            "/start" => Some(Command::Start),
            "/stop" => Some(Command::Stop),
            _ => None,
        }
    }
}

/// Keeps the subscriber set in sync with `/start` and `/stop` messages.
pub struct CommandListener {
    api: TelegramApi,
    tracker: NoveltyTracker,
    offset: Option<i64>,
    long_poll_secs: u64,
    error_pause: Duration,
}

impl CommandListener {
    pub fn new(api: TelegramApi, tracker: NoveltyTracker) -> Self {
        Self {
            api,
            tracker,
            offset: None,
            long_poll_secs: 25,
            error_pause: Duration::from_secs(5),
        }
    }

    pub fn with_long_poll(mut self, secs: u64) -> Self {
        self.long_poll_secs = secs;
        self
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Fetches one batch of updates and applies the commands in it.
    /// Returns how many commands were applied.
    pub async fn poll_once(&mut self) -> Result<usize, NotifyError> {
        let updates = self.api.get_updates(self.offset, self.long_poll_secs).await?;
        let mut applied = 0;
        for update in updates {
            let next = update.update_id + 1;
            self.offset = Some(self.offset.map_or(next, |o| o.max(next)));
            if self.apply(update).await {
                applied += 1;
            }
        }
        Ok(applied)
    }

    async fn apply(&self, update: Update) -> bool {
        let Some(message) = update.message else {
            return false;
        };
        let Some(command) = message.text.as_deref().and_then(Command::parse) else {
            return false;
        };
        let chat_id = message.chat.id;
        let (result, reply) = match command {
            Command::Start => (self.tracker.add_subscriber(chat_id).await, SUBSCRIBED_REPLY),
            Command::Stop => (self.tracker.remove_subscriber(chat_id).await, UNSUBSCRIBED_REPLY),
        };
        match result {
            Ok(changed) => {
                info!(chat_id, ?command, changed, "subscription command");
                if let Err(err) = self.api.send_message(chat_id, reply).await {
                    warn!(chat_id, error = %err, "failed to confirm command");
                }
                true
            }
            Err(err) => {
                error!(chat_id, ?command, error = %err, "failed to persist subscription change");
                false
            }
        }
    }

    pub fn spawn(self) -> PollerHandle {
        let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
        let join = tokio::spawn(async move {
            let mut listener = self;
            loop {
                tokio::select! {
                    _ = cancel_rx.recv() => {
                        info!("command listener shutdown requested");
                        break;
                    }
                    result = listener.poll_once() => {
                        if let Err(err) = result {
                            warn!(error = %err, "failed to poll telegram updates");
                            tokio::select! {
                                _ = cancel_rx.recv() => break,
                                _ = tokio::time::sleep(listener.error_pause) => {}
                            }
                        }
                    }
                }
            }
        });
        PollerHandle::new(cancel_tx, join)
    }
}
