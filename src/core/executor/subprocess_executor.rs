//! The subprocess executor half of C6: delegates to the runtime's
//! `invoke`/`stream` and projects the child's task status message back
//! onto the `Executor` contract. `close` is a no-op — the runner owns
//! subprocess lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;

use crate::core::subprocess_runtime::SubprocessRuntime;
use crate::core::task::{Message, Task};
use crate::errors::{AppError, Result};

use super::{Executor, MessageStream};

pub struct SubprocessExecutor {
    runtime: Arc<SubprocessRuntime>,
}

impl SubprocessExecutor {
    pub fn new(runtime: Arc<SubprocessRuntime>) -> Self {
        Self { runtime }
    }

    fn project(task: Task) -> Result<Message> {
        task.status
            .message
            .ok_or_else(|| AppError::Subprocess("subprocess task carried no status message".to_string()))
    }
}

#[async_trait]
impl Executor for SubprocessExecutor {
    async fn execute(&self, task: &Task, message: &Message) -> Result<Message> {
        let result = self.runtime.invoke(&task.id, message).await?;
        Self::project(result)
    }

    async fn execute_stream(&self, task: &Task, message: &Message) -> Result<MessageStream> {
        let stream = self.runtime.stream(&task.id, message).await?;
        let mapped = stream.map(|item| item.and_then(Self::project));
        Ok(Box::pin(mapped))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
