//! The A2A data model: tasks, messages, parts, artifacts, and the agent
//! card. Trees, not graphs — there are no cyclic references.

use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, CapabilitiesConfig, SkillConfig};

/// One part of a message. Exactly one payload is populated per the `kind`
/// tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    #[serde(rename = "data")]
    StructuredData {
        data: serde_json::Value,
    },
    File {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        mime_type: Option<String>,
        #[serde(default)]
        bytes: Option<String>,
        #[serde(default)]
        uri: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// A role plus an ordered, non-empty list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenates all text parts with newlines; non-text parts contribute
    /// nothing (used when converting history into chat-completion turns).
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A named output produced only by completed tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub parts: Vec<Part>,
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    Completed,
    Failed,
    Canceled,
    InputRequired,
    AuthRequired,
    Rejected,
}

impl TaskState {
    /// Terminal states are final except via explicit cancellation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled | TaskState::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub message: Option<Message>,
}

/// A unit of work identified by a caller-supplied id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default = "default_metadata")]
    pub metadata: serde_json::Value,
}

fn default_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Task {
    /// Creates a freshly `submitted` task carrying the inbound message in
    /// its history.
    pub fn new_submitted(id: impl Into<String>, inbound: Message) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus {
                state: TaskState::Submitted,
                message: None,
            },
            history: vec![inbound],
            artifacts: Vec::new(),
            metadata: default_metadata(),
        }
    }

    pub fn set_state(&mut self, state: TaskState) {
        self.status = TaskStatus {
            state,
            message: self.status.message.clone(),
        };
    }

    pub fn complete(&mut self, response: Message) {
        self.history.push(response.clone());
        self.artifacts.push(Artifact {
            name: "response".to_string(),
            description: None,
            parts: response.parts,
        });
        self.status = TaskStatus {
            state: TaskState::Completed,
            message: Some(response),
        };
    }

    pub fn fail(&mut self, error_text: impl Into<String>) {
        let message = Message::agent_text(error_text);
        self.status = TaskStatus {
            state: TaskState::Failed,
            message: Some(message),
        };
    }
}

/// A skill descriptor as advertised in the agent card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SkillDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl From<&SkillConfig> for SkillDescriptor {
    fn from(value: &SkillConfig) -> Self {
        Self {
            id: value.id.clone(),
            name: value.name.clone(),
            description: value.description.clone(),
            tags: value.tags.clone(),
        }
    }
}

/// Discovery descriptor served at `/.well-known/agent.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub url: String,
    pub skills: Vec<SkillDescriptor>,
    pub capabilities: CapabilitiesConfig,
}

impl AgentCard {
    pub fn from_config(agent: &AgentConfig) -> Self {
        Self {
            name: agent.name.clone(),
            description: agent.description.clone(),
            url: agent.url.clone(),
            skills: agent.skills.iter().map(SkillDescriptor::from).collect(),
            capabilities: agent.capabilities,
        }
    }
}

/// Platform-agnostic inbound event, normalized by a channel plugin.
/// Immutable after normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ChannelEvent {
    pub channel: String,
    pub workspace_id: String,
    pub user_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub raw: serde_json::Value,
}
