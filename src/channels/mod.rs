//! Channel adapter contract and the shared dispatch path that turns
//! a normalized [`ChannelEvent`] into a `tasks/send` RPC call against the
//! local A2A server. One capability set, a registered plugin list of
//! concrete implementations per platform.

pub mod markdown;
pub mod slack;
pub mod telegram;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::core::task::{ChannelEvent, Message};
use crate::errors::Result;
use crate::server::rpc::{JsonRpcRequest, JsonRpcResponse};

const NO_RESPONSE_SENTINEL: &str = "(no response)";

/// One channel adapter: normalizes platform webhooks/polling into
/// [`ChannelEvent`]s and renders agent replies back into the platform's
/// dialect.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Starts the adapter's listener (webhook server or poll loop) and
    /// runs until `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Posts a normalized event to the local A2A server as a `tasks/send` RPC
/// call and returns the agent's reply text, or the sentinel if the task
/// produced no status message.
pub async fn dispatch_event(agent_url: &str, event: &ChannelEvent) -> Result<String> {
    let client = reqwest::Client::new();
    let task_id = uuid::Uuid::new_v4().to_string();
    let request = JsonRpcRequest::new(
        "tasks/send",
        serde_json::json!({
            "id": task_id,
            "message": Message::user_text(event.message.clone()),
        }),
    );

    let response = client
        .post(agent_url)
        .json(&request)
        .send()
        .await
        .map_err(|err| crate::errors::AppError::Channel(format!("failed to reach a2a server: {err}")))?;

    let envelope: JsonRpcResponse = response
        .json()
        .await
        .map_err(|err| crate::errors::AppError::Channel(format!("malformed a2a response: {err}")))?;

    if let Some(error) = envelope.error {
        return Err(crate::errors::AppError::Channel(format!(
            "a2a rpc error [{}]: {}",
            error.code, error.message
        )));
    }

    let result = envelope
        .result
        .ok_or_else(|| crate::errors::AppError::Channel("a2a server returned no result".to_string()))?;

    let text = result
        .get("status")
        .and_then(|s| s.get("message"))
        .and_then(|m| m.get("parts"))
        .and_then(|parts| parts.as_array())
        .and_then(|parts| parts.iter().find_map(|p| p.get("text")).and_then(|t| t.as_str()))
        .unwrap_or(NO_RESPONSE_SENTINEL)
        .to_string();

    Ok(text)
}

/// Runs every registered channel concurrently until `cancel` fires. A
/// single channel failing does not bring down the others.
pub async fn run_all(channels: Vec<Box<dyn ChannelPlugin>>, cancel: CancellationToken) {
    let mut handles = Vec::with_capacity(channels.len());
    for channel in channels {
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let name = channel.name().to_string();
            if let Err(err) = channel.run(cancel).await {
                error!(channel = name.as_str(), error = %err, "channel adapter exited with error");
            }
        }));
    }
    for handle in handles {
        if let Err(err) = handle.await {
            warn!(error = %err, "channel adapter task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_used_when_no_text_part_present() {
        let envelope = serde_json::json!({
            "status": {"state": "working", "message": null}
        });
        let text = envelope
            .get("status")
            .and_then(|s| s.get("message"))
            .and_then(|m| m.get("parts"))
            .and_then(|parts| parts.as_array())
            .and_then(|parts| parts.iter().find_map(|p| p.get("text")).and_then(|t| t.as_str()))
            .unwrap_or(NO_RESPONSE_SENTINEL);
        assert_eq!(text, NO_RESPONSE_SENTINEL);
    }
}
