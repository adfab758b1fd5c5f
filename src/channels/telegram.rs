//! Telegram channel adapter: long-polling or webhook ingestion plus
//! a typing-indicator ticker, built on raw `reqwest` calls to the Bot API
//! (see DESIGN.md for why this avoids a higher-level bot framework crate).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ChannelConfig;
use crate::core::task::ChannelEvent;
use crate::errors::{AppError, Result};

use super::{markdown, ChannelPlugin};

const DEFAULT_WEBHOOK_PORT: u16 = 3001;
const DEFAULT_WEBHOOK_PATH: &str = "/telegram/webhook";
const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);
const TYPING_TICK: Duration = Duration::from_secs(4);
const TELEGRAM_CHUNK_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Polling,
    Webhook,
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct TelegramMessage {
    message_id: i64,
    #[serde(default)]
    text: Option<String>,
    chat: TelegramChat,
    #[serde(default)]
    from: Option<TelegramUser>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
struct TelegramUser {
    id: i64,
}

struct TelegramState {
    token: String,
    agent_url: String,
}

impl TelegramState {
    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.token)
    }
}

pub struct TelegramChannel {
    mode: Mode,
    port: u16,
    path: String,
    state: Arc<TelegramState>,
}

impl TelegramChannel {
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let settings = config.resolved_settings();
        let token = settings
            .get("bot_token")
            .cloned()
            .ok_or_else(|| AppError::Config("telegram channel requires a bot_token setting".to_string()))?;
        let agent_url = config
            .agent_url
            .clone()
            .ok_or_else(|| AppError::Config("telegram channel requires agent_url".to_string()))?;
        let mode = match settings.get("mode").map(String::as_str) {
            Some("webhook") => Mode::Webhook,
            _ => Mode::Polling,
        };
        Ok(Self {
            mode,
            port: config.port.unwrap_or(DEFAULT_WEBHOOK_PORT),
            path: config.path.clone().unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string()),
            state: Arc::new(TelegramState { token, agent_url }),
        })
    }

    async fn run_polling(&self, cancel: CancellationToken) -> Result<()> {
        let client = reqwest::Client::new();
        let mut offset: i64 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let url = self.state.api_url("getUpdates");
            let response = client
                .get(&url)
                .query(&[("offset", offset.to_string()), ("timeout", POLL_TIMEOUT_SECS.to_string())])
                .send()
                .await;

            let updates = match response {
                Ok(resp) => match resp.json::<GetUpdatesResponse>().await {
                    Ok(parsed) => parsed.result,
                    Err(err) => {
                        warn!(error = %err, "failed to decode telegram getUpdates response");
                        tokio::select! {
                            () = cancel.cancelled() => return Ok(()),
                            () = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                        }
                        continue;
                    }
                },
                Err(err) => {
                    warn!(error = %err, "telegram getUpdates request failed");
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                if let Some(message) = update.message.clone() {
                    let raw = serde_json::to_value(&update).unwrap_or(serde_json::Value::Null);
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        handle_message(state, message, raw).await;
                    });
                }
            }
        }
    }

    async fn run_webhook(&self, cancel: CancellationToken) -> Result<()> {
        let app = Router::new()
            .route(&self.path, post(webhook_handler))
            .with_state(self.state.clone());

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|err| AppError::Channel(format!("failed to bind telegram listener on {addr}: {err}")))?;
        info!(%addr, path = %self.path, "telegram webhook listener started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await
            .map_err(|err| AppError::Channel(err.to_string()))
    }
}

async fn webhook_handler(
    State(state): State<Arc<TelegramState>>,
    Json(update): Json<TelegramUpdate>,
) -> impl IntoResponse {
    let raw = serde_json::to_value(&update).unwrap_or(serde_json::Value::Null);
    if let Some(message) = update.message {
        tokio::spawn(async move {
            handle_message(state, message, raw).await;
        });
    }
    StatusCode::OK
}

async fn handle_message(state: Arc<TelegramState>, message: TelegramMessage, raw: serde_json::Value) {
    let Some(text) = message.text else {
        return;
    };

    let chat_id = message.chat.id.to_string();
    let message_id = message.message_id;
    let user_id = message.from.map(|u| u.id.to_string()).unwrap_or_default();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let typing_state = state.clone();
    let typing_chat = chat_id.clone();
    let typing_task = tokio::spawn(async move { run_typing_ticker(typing_state, typing_chat, stop_rx).await });

    let event = ChannelEvent {
        channel: "telegram".to_string(),
        workspace_id: chat_id.clone(),
        user_id,
        thread_id: Some(message_id.to_string()),
        message: text,
        attachments: Vec::new(),
        raw,
    };

    let result = super::dispatch_event(&state.agent_url, &event).await;

    let _ = stop_tx.send(());
    let _ = typing_task.await;

    match result {
        Ok(reply) => {
            if let Err(err) = send_reply(&state, &chat_id, message_id, &reply).await {
                error!(error = %err, "failed to send telegram reply");
            }
        }
        Err(err) => error!(error = %err, "telegram event dispatch failed"),
    }
}

/// Sends a typing action immediately, then every [`TYPING_TICK`] until
/// `stop` resolves.
async fn run_typing_ticker(state: Arc<TelegramState>, chat_id: String, mut stop: oneshot::Receiver<()>) {
    let client = reqwest::Client::new();
    loop {
        let _ = client
            .post(state.api_url("sendChatAction"))
            .json(&serde_json::json!({"chat_id": chat_id, "action": "typing"}))
            .send()
            .await;

        tokio::select! {
            _ = &mut stop => return,
            () = tokio::time::sleep(TYPING_TICK) => {}
        }
    }
}

async fn send_reply(state: &TelegramState, chat_id: &str, reply_to: i64, reply: &str) -> Result<()> {
    let rendered = markdown::to_telegram_html(reply);
    let chunks = markdown::split_message(&rendered, TELEGRAM_CHUNK_LIMIT);
    let client = reqwest::Client::new();

    for (index, chunk) in chunks.iter().enumerate() {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": chunk,
            "parse_mode": "HTML",
        });
        if index == 0 {
            body["reply_to_message_id"] = serde_json::Value::Number(reply_to.into());
        }

        let response = client
            .post(state.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Channel(format!("telegram sendMessage request failed: {err}")))?;

        if response.status().is_success() {
            continue;
        }

        // The model's reply can produce HTML Telegram rejects (unbalanced
        // tags); retry once as plain text.
        warn!(status = %response.status(), "telegram rejected HTML message, retrying as plain text");
        let mut plain_body = serde_json::json!({"chat_id": chat_id, "text": chunk});
        if index == 0 {
            plain_body["reply_to_message_id"] = serde_json::Value::Number(reply_to.into());
        }
        let retry = client
            .post(state.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|err| AppError::Channel(format!("telegram plain-text retry failed: {err}")))?;

        if !retry.status().is_success() {
            return Err(AppError::Channel(format!(
                "telegram sendMessage failed even as plain text: {}",
                retry.status()
            )));
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl ChannelPlugin for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        match self.mode {
            Mode::Polling => self.run_polling(cancel).await,
            Mode::Webhook => self.run_webhook(cancel).await,
        }
    }
}
