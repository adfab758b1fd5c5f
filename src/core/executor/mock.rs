//! Deterministic mock executor, used for tests and the
//! `mock_tools` config flag.

use async_trait::async_trait;

use crate::core::task::{Message, Task};
use crate::errors::Result;

use super::Executor;

pub struct MockExecutor;

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, _task: &Task, message: &Message) -> Result<Message> {
        Ok(Message::agent_text(format!(
            "Mock response for: {}",
            message.text_content()
        )))
    }
}
