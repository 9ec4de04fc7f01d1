use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use crate::progress::{ProgressEvent, ProgressReceiver};
use crate::{Error, Result};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Identifier of a chat message that is edited in place.
pub type NotifierHandle = i64;

/// An external chat that mirrors per-file progress as one editable message.
pub trait ChatNotifier: Send + Sync {
    fn send_message<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<NotifierHandle>> + Send + 'a>>;

    fn edit_message<'a>(
        &'a self,
        handle: NotifierHandle,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn delete_message<'a>(
        &'a self,
        handle: NotifierHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct TelegramNotifierConfig {
    pub bot_token: String,
    pub chat_id: String,
}

pub struct TelegramBotNotifier {
    config: TelegramNotifierConfig,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramBotNotifier {
    pub fn new(config: TelegramNotifierConfig) -> Self {
        Self {
            config,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn call<T>(&self, method: &str, query: &[(&str, String)]) -> Result<Option<T>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/bot{}/{method}", self.api_base, self.config.bot_token);
        let mut params = vec![("chat_id", self.config.chat_id.clone())];
        params.extend(query.iter().map(|(k, v)| (*k, v.clone())));

        let res = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::Notifier {
                message: format!("{method} request failed: {e}"),
            })?;
        let body = res.text().await.map_err(|e| Error::Notifier {
            message: format!("{method} read response failed: {e}"),
        })?;
        parse_bot_reply(method, &body)
    }
}

impl ChatNotifier for TelegramBotNotifier {
    fn send_message<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<NotifierHandle>> + Send + 'a>> {
        Box::pin(async move {
            let message: Option<TelegramMessage> = self
                .call("sendMessage", &[("text", text.to_string())])
                .await?;
            message
                .map(|m| m.message_id)
                .ok_or_else(|| Error::Notifier {
                    message: "sendMessage missing result.message_id".to_string(),
                })
        })
    }

    fn edit_message<'a>(
        &'a self,
        handle: NotifierHandle,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let _: Option<serde_json::Value> = self
                .call(
                    "editMessageText",
                    &[
                        ("message_id", handle.to_string()),
                        ("text", text.to_string()),
                    ],
                )
                .await?;
            Ok(())
        })
    }

    fn delete_message<'a>(
        &'a self,
        handle: NotifierHandle,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let _: Option<serde_json::Value> = self
                .call("deleteMessage", &[("message_id", handle.to_string())])
                .await?;
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: NotifierHandle,
}

/// `Ok(None)` for an edit that changed nothing; every other `ok=false`
/// reply is an error.
fn parse_bot_reply<T>(method: &str, body: &str) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let parsed: TelegramResponse<T> = serde_json::from_str(body).map_err(|e| Error::Notifier {
        message: format!("{method} invalid json: {e}; body={body}"),
    })?;
    if parsed.ok {
        return Ok(parsed.result);
    }
    let description = parsed
        .description
        .unwrap_or_else(|| "telegram returned ok=false".to_string());
    if description.contains("message is not modified") {
        return Ok(None);
    }
    Err(Error::Notifier {
        message: format!("{method}: {description}"),
    })
}

/// Consumes progress events: every event is logged, and when a chat
/// notifier is configured each file gets its own live message.
pub struct NotificationSink {
    notifier: Option<Arc<dyn ChatNotifier>>,
    handles: HashMap<String, NotifierHandle>,
}

impl NotificationSink {
    pub fn new(notifier: Option<Arc<dyn ChatNotifier>>) -> Self {
        Self {
            notifier,
            handles: HashMap::new(),
        }
    }

    pub fn report(&self, text: &str) {
        info!(event = "progress", text = %text, "{text}");
    }

    pub async fn handle(&mut self, event: &ProgressEvent) -> Result<()> {
        let text = event.text();
        match event {
            ProgressEvent::Failed { .. } => {
                warn!(event = "progress", text = %text, "{text}");
            }
            _ => self.report(&text),
        }

        let Some(notifier) = self.notifier.clone() else {
            return Ok(());
        };
        let path = event.path();
        let handle = match self.handles.get(path) {
            Some(handle) => {
                notifier.edit_message(*handle, &text).await?;
                *handle
            }
            None => {
                let handle = notifier.send_message(&text).await?;
                self.handles.insert(path.to_string(), handle);
                handle
            }
        };

        if event.is_terminal() {
            self.handles.remove(path);
            // Failures stay in the chat.
            if !matches!(event, ProgressEvent::Failed { .. }) {
                notifier.delete_message(handle).await?;
            }
        }
        Ok(())
    }

    /// Runs until every sender is dropped or a notifier call fails.
    pub async fn run(mut self, mut events: ProgressReceiver) -> Result<()> {
        while let Some(event) = events.recv().await {
            self.handle(&event).await?;
        }
        Ok(())
    }
}
