//! Polymorphic executor abstraction. One capability set — `execute`,
//! `execute_stream`, `close` — with four tagged implementations selected
//! at runner assembly time.

pub mod llm_executor;
pub mod mock;
pub mod stub;
pub mod subprocess_executor;

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::core::task::{Message, Task};
use crate::errors::Result;

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message>> + Send>>;

/// Turns an inbound message into a response message within a task.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &Task, message: &Message) -> Result<Message>;

    /// Streaming defaults to a single coalesced final delta: this default
    /// implementation wraps `execute` as a one-element stream.
    async fn execute_stream(&self, task: &Task, message: &Message) -> Result<MessageStream> {
        let result = self.execute(task, message).await;
        Ok(Box::pin(tokio_stream::once(result)))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
