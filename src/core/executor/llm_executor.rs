//! Bounded tool-calling loop over a chat-completion client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::core::hooks::{HookContext, HookRegistry};
use crate::core::memory::MemoryBuffer;
use crate::core::task::{Message, Role, Task};
use crate::errors::Result;
use crate::llm::{ChatClient, ChatMessage, ToolExecutor};

use super::Executor;

/// Default bound on tool-calling loop iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Oversized tool output is truncated to this many characters before being
/// fed back to the model.
const TOOL_OUTPUT_CAP: usize = 49_000;

const GENERIC_LLM_ERROR: &str = "Something went wrong while talking to the language model.";

pub struct LlmExecutor {
    chat_client: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolExecutor>,
    hooks: Arc<HookRegistry>,
    system_prompt: String,
    max_iterations: usize,
}

impl LlmExecutor {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        tools: Arc<dyn ToolExecutor>,
        hooks: Arc<HookRegistry>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            chat_client,
            tools,
            hooks,
            system_prompt: system_prompt.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Converts a role + history entry into a chat-completion turn: agent
    /// maps to assistant, user stays user.
    fn to_chat_message(message: &Message) -> ChatMessage {
        match message.role {
            Role::Agent => ChatMessage::assistant(message.text_content()),
            Role::User => ChatMessage::user(message.text_content()),
        }
    }

    fn build_memory(&self, task: &Task) -> MemoryBuffer {
        let mut memory = MemoryBuffer::new(self.system_prompt.clone());
        // `task.history` includes the current inbound message as its last
        // entry (it was recorded at task creation); everything before that
        // is prior turns.
        let prior = task.history.len().saturating_sub(1);
        for entry in &task.history[..prior] {
            memory.push(Self::to_chat_message(entry));
        }
        memory
    }
}

#[async_trait]
impl Executor for LlmExecutor {
    async fn execute(&self, task: &Task, message: &Message) -> Result<Message> {
        let mut memory = self.build_memory(task);
        memory.push(Self::to_chat_message(message));

        let tool_defs = self.tools.definitions();

        for _iteration in 0..self.max_iterations {
            let messages = memory.to_messages();

            self.hooks.fire_before_llm_call(&HookContext {
                messages: messages.clone(),
                ..Default::default()
            });

            let response = match self.chat_client.chat(&messages, &tool_defs).await {
                Ok(response) => response,
                Err(err) => {
                    self.hooks.fire_on_error(&HookContext {
                        messages: messages.clone(),
                        error: Some(err.to_string()),
                        ..Default::default()
                    });
                    error!(error = %err, "llm call failed");
                    return Err(crate::errors::AppError::Executor(GENERIC_LLM_ERROR.to_string()));
                }
            };

            self.hooks.fire_after_llm_call(&HookContext {
                messages: messages.clone(),
                response: Some(response.clone()),
                ..Default::default()
            });

            let mut assistant_msg = ChatMessage::assistant(response.content.clone());
            if response.has_tool_calls() {
                assistant_msg.tool_calls = Some(response.tool_calls.clone());
            }
            memory.push(assistant_msg);

            if response.finish_reason == "stop" || !response.has_tool_calls() {
                return Ok(Message::agent_text(response.content));
            }

            if tool_defs.is_empty() {
                return Ok(Message::agent_text(response.content));
            }

            for call in &response.tool_calls {
                self.hooks.fire_before_tool_exec(&HookContext {
                    tool_name: Some(call.name.clone()),
                    tool_input: Some(call.arguments.clone()),
                    ..Default::default()
                });

                let (output, error_text) = match self.tools.call(&call.name, call.arguments.clone()).await {
                    Ok(output) => (output, None),
                    Err(err) => (
                        format!("Error executing tool {}: {}", call.name, err),
                        Some(err.to_string()),
                    ),
                };

                let output = truncate_tool_output(output);

                self.hooks.fire_after_tool_exec(&HookContext {
                    tool_name: Some(call.name.clone()),
                    tool_input: Some(call.arguments.clone()),
                    tool_output: Some(output.clone()),
                    error: error_text,
                    ..Default::default()
                });

                memory.push(ChatMessage::tool_result(call.id.clone(), call.name.clone(), output));
            }

            debug!(iteration = _iteration, "continuing tool-calling loop");
        }

        Err(crate::errors::AppError::Executor(format!(
            "agent loop exceeded maximum iterations ({})",
            self.max_iterations
        )))
    }
}

/// Truncates oversized tool output, appending a marker line naming the
/// original length.
fn truncate_tool_output(output: String) -> String {
    if output.len() <= TOOL_OUTPUT_CAP {
        return output;
    }
    let original_len = output.len();
    let mut truncated = output[..TOOL_OUTPUT_CAP].to_string();
    truncated.push_str(&format!("\n[TRUNCATED: original length {original_len} characters]"));
    truncated
}
