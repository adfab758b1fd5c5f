//! Chat-completion message/tool types and the `ChatClient` seam:
//! a tool-calling chat-completion round trip over a provider-agnostic
//! trait object.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// One tool call emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single turn in the conversation sent to the chat-completion API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            tool_calls: None,
        }
    }

    /// Rough byte weight used for the memory buffer's total-size cap: role
    /// + content + a JSON approximation of any tool-call payload.
    pub fn weight(&self) -> usize {
        let tool_calls_len = self
            .tool_calls
            .as_ref()
            .map(|calls| serde_json::to_string(calls).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0);
        self.role.len() + self.content.len() + tool_calls_len
    }
}

/// A tool definition advertised to the chat-completion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The model's reply to one `chat` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

impl ChatCompletionResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A chat-completion client: the seam the LLM executor drives.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletionResponse>;
}

/// A registry of callable tools, invoked by name with raw JSON arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    async fn call(&self, name: &str, arguments: serde_json::Value) -> Result<String>;
}

/// A tool registry with no tools — used when the runner has no external
/// tool registry wired in; absence of tools is a valid configuration.
pub struct EmptyToolExecutor;

#[async_trait]
impl ToolExecutor for EmptyToolExecutor {
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    async fn call(&self, name: &str, _arguments: serde_json::Value) -> Result<String> {
        Err(crate::errors::AppError::Executor(format!(
            "no tool named '{name}' is registered"
        )))
    }
}
