//! Slack webhook channel adapter: signature verification, event
//! normalization, and reply dispatch against the local A2A server via a
//! `tasks/send` RPC call.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use hmac::Mac;
use serde::Deserialize;
use sha2::Sha256;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ChannelConfig;
use crate::core::task::ChannelEvent;
use crate::errors::{AppError, Result};

use super::{markdown, ChannelPlugin};

type HmacSha256 = hmac::Hmac<Sha256>;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PATH: &str = "/slack/events";
const REPLAY_WINDOW_SECS: u64 = 300;
const SLACK_CHUNK_LIMIT: usize = 4000;

struct SlackState {
    bot_token: String,
    signing_secret: String,
    agent_url: String,
}

#[derive(Debug, Deserialize)]
struct SlackEventPayload {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event: Option<SlackEventDetails>,
}

#[derive(Debug, Deserialize)]
struct SlackEventDetails {
    #[serde(rename = "type")]
    inner_type: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

/// Verifies the `X-Slack-Signature` / `X-Slack-Request-Timestamp` pair
/// against the signing secret, rejecting replays older than
/// [`REPLAY_WINDOW_SECS`].
fn verify_slack_signature(headers: &HeaderMap, body: &[u8], signing_secret: &str) -> bool {
    let Some(timestamp) = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    if let Ok(ts) = timestamp.parse::<u64>() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if now.abs_diff(ts) > REPLAY_WINDOW_SECS {
            return false;
        }
    } else {
        return false;
    }

    let Some(signature) = headers.get("x-slack-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };

    let basestring = format!("v0:{}:{}", timestamp, String::from_utf8_lossy(body));
    let Ok(mut mac) = HmacSha256::new_from_slice(signing_secret.as_bytes()) else {
        return false;
    };
    mac.update(basestring.as_bytes());
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    if signature.len() != expected.len() {
        return false;
    }
    signature
        .as_bytes()
        .iter()
        .zip(expected.as_bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

async fn slack_webhook(
    State(state): State<Arc<SlackState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !verify_slack_signature(&headers, &body, &state.signing_secret) {
        warn!("rejected slack webhook with invalid or stale signature");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid signature"})),
        )
            .into_response();
    }

    let payload: SlackEventPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid json"})),
            )
                .into_response();
        }
    };
    let raw_body = serde_json::from_slice::<serde_json::Value>(&body).unwrap_or(serde_json::Value::Null);

    if payload.event_type == "url_verification"
        && let Some(challenge) = payload.challenge
    {
        return Json(serde_json::json!({"challenge": challenge})).into_response();
    }

    if payload.event_type == "event_callback"
        && let Some(event) = payload.event
        && event.bot_id.is_none()
        && (event.inner_type == "message" || event.inner_type == "app_mention")
        && let (Some(text), Some(user), Some(channel)) = (event.text, event.user, event.channel)
    {
        let thread_ts = event.thread_ts.or(event.ts);
        let state = state.clone();
        let raw_body = raw_body.clone();
        tokio::spawn(async move {
            let channel_event = ChannelEvent {
                channel: "slack".to_string(),
                workspace_id: channel.clone(),
                user_id: user,
                thread_id: thread_ts.clone(),
                message: text,
                attachments: Vec::new(),
                raw: raw_body,
            };

            match super::dispatch_event(&state.agent_url, &channel_event).await {
                Ok(reply) => {
                    if let Err(err) = post_reply(&state, &channel, thread_ts.as_deref(), &reply).await {
                        error!(error = %err, "failed to post slack reply");
                    }
                }
                Err(err) => error!(error = %err, "slack event dispatch failed"),
            }
        });
    }

    Json(serde_json::json!({"status": "ok"})).into_response()
}

async fn post_reply(state: &SlackState, channel: &str, thread_ts: Option<&str>, reply: &str) -> Result<()> {
    let rendered = markdown::to_slack_mrkdwn(reply);
    let chunks = markdown::split_message(&rendered, SLACK_CHUNK_LIMIT);
    let client = reqwest::Client::new();

    for (index, chunk) in chunks.iter().enumerate() {
        let mut body = serde_json::json!({"channel": channel, "text": chunk});
        if index == 0
            && let Some(ts) = thread_ts
        {
            body["thread_ts"] = serde_json::Value::String(ts.to_string());
        }

        let response = client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&state.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Channel(format!("slack chat.postMessage request failed: {err}")))?;

        if !response.status().is_success() {
            return Err(AppError::Channel(format!(
                "slack chat.postMessage returned {}",
                response.status()
            )));
        }
    }
    Ok(())
}

pub struct SlackChannel {
    port: u16,
    path: String,
    state: Arc<SlackState>,
}

impl SlackChannel {
    pub fn from_config(config: &ChannelConfig) -> Result<Self> {
        let settings = config.resolved_settings();
        let agent_url = config
            .agent_url
            .clone()
            .ok_or_else(|| AppError::Config("slack channel requires agent_url".to_string()))?;
        let signing_secret = settings.get("signing_secret").cloned().unwrap_or_default();
        if signing_secret.is_empty() {
            return Err(AppError::Config(
                "slack channel requires a non-empty signing_secret".to_string(),
            ));
        }
        Ok(Self {
            port: config.port.unwrap_or(DEFAULT_PORT),
            path: config.path.clone().unwrap_or_else(|| DEFAULT_PATH.to_string()),
            state: Arc::new(SlackState {
                bot_token: settings.get("bot_token").cloned().unwrap_or_default(),
                signing_secret,
                agent_url,
            }),
        })
    }
}

#[async_trait::async_trait]
impl ChannelPlugin for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let app = Router::new()
            .route(&self.path, post(slack_webhook))
            .with_state(self.state.clone());

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|err| AppError::Channel(format!("failed to bind slack listener on {addr}: {err}")))?;
        info!(%addr, path = %self.path, "slack webhook listener started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await
            .map_err(|err| AppError::Channel(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_rejected_without_timestamp_header() {
        let headers = HeaderMap::new();
        assert!(!verify_slack_signature(&headers, b"body", "secret"));
    }

    #[test]
    fn signature_rejected_when_replay_window_exceeded() {
        let mut headers = HeaderMap::new();
        headers.insert("x-slack-request-timestamp", "1".parse().unwrap());
        headers.insert("x-slack-signature", "v0=deadbeef".parse().unwrap());
        assert!(!verify_slack_signature(&headers, b"body", "secret"));
    }

    #[test]
    fn signature_accepted_when_hmac_matches() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let body = b"{\"type\":\"event_callback\"}";
        let basestring = format!("v0:{now}:{}", String::from_utf8_lossy(body));
        let mut mac = HmacSha256::new_from_slice(b"shh").unwrap();
        mac.update(basestring.as_bytes());
        let signature = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

        let mut headers = HeaderMap::new();
        headers.insert("x-slack-request-timestamp", now.to_string().parse().unwrap());
        headers.insert("x-slack-signature", signature.parse().unwrap());
        assert!(verify_slack_signature(&headers, body, "shh"));
    }

    #[test]
    fn from_config_requires_agent_url() {
        let config = ChannelConfig {
            name: "slack".to_string(),
            port: None,
            path: None,
            settings: Default::default(),
            agent_url: None,
        };
        assert!(SlackChannel::from_config(&config).is_err());
    }

    #[test]
    fn from_config_requires_non_empty_signing_secret() {
        let config = ChannelConfig {
            name: "slack".to_string(),
            port: None,
            path: None,
            settings: Default::default(),
            agent_url: Some("http://127.0.0.1:41241".to_string()),
        };
        assert!(SlackChannel::from_config(&config).is_err());
    }
}
