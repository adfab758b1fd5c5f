//! Stub executor: used when no model config resolves and no
//! framework names a subprocess runtime. Every call fails with a
//! framework-tagged message.

use async_trait::async_trait;

use crate::core::task::{Message, Task};
use crate::errors::{AppError, Result};

use super::Executor;

pub struct StubExecutor {
    framework: String,
}

impl StubExecutor {
    pub fn new(framework: impl Into<String>) -> Self {
        Self {
            framework: framework.into(),
        }
    }
}

#[async_trait]
impl Executor for StubExecutor {
    async fn execute(&self, _task: &Task, _message: &Message) -> Result<Message> {
        Err(AppError::Executor(format!(
            "no executor configured for framework '{}'",
            self.framework
        )))
    }
}
