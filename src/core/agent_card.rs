//! Agent card storage with hot-swap support, for the watcher to replace
//! atomically on a reload.

use tokio::sync::RwLock;

use super::task::AgentCard;

pub struct AgentCardHolder {
    inner: RwLock<AgentCard>,
}

impl AgentCardHolder {
    pub fn new(card: AgentCard) -> Self {
        Self {
            inner: RwLock::new(card),
        }
    }

    pub async fn get(&self) -> AgentCard {
        self.inner.read().await.clone()
    }

    pub async fn set(&self, card: AgentCard) {
        *self.inner.write().await = card;
    }
}
