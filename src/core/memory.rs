//! Per-call conversation buffer with structural trimming: a
//! truncation-on-append content cap plus a group-aware two-tier total-size
//! cap.

use crate::llm::ChatMessage;

/// Hard cap on a single appended message's content length.
pub const SINGLE_MESSAGE_CAP: usize = 50_000;
const TRUNCATION_SUFFIX: &str = "\n[TRUNCATED]";

/// Default total-size cap across all buffered messages.
pub const DEFAULT_TOTAL_CAP: usize = 200_000;

/// A per-call conversation buffer. The system prompt is never trimmed and
/// is always prepended on read; every other message is subject to the
/// single-message and total-size caps.
#[derive(Debug, Clone)]
pub struct MemoryBuffer {
    system_prompt: String,
    messages: Vec<ChatMessage>,
    total_cap: usize,
}

impl MemoryBuffer {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: Vec::new(),
            total_cap: DEFAULT_TOTAL_CAP,
        }
    }

    pub fn with_total_cap(mut self, cap: usize) -> Self {
        self.total_cap = cap;
        self
    }

    /// Appends a message, truncating its content to [`SINGLE_MESSAGE_CAP`]
    /// first, then enforcing the total-size cap by trimming from the
    /// front in group units.
    pub fn push(&mut self, mut message: ChatMessage) {
        if message.content.len() > SINGLE_MESSAGE_CAP {
            let mut truncated = message.content[..SINGLE_MESSAGE_CAP].to_string();
            truncated.push_str(TRUNCATION_SUFFIX);
            message.content = truncated;
        }
        self.messages.push(message);
        self.enforce_total_cap();
    }

    fn total_weight(&self) -> usize {
        self.messages.iter().map(ChatMessage::weight).sum()
    }

    /// Trims leading messages in atomic groups until the total weight fits
    /// the cap, or only one group remains.
    fn enforce_total_cap(&mut self) {
        while self.total_weight() > self.total_cap && self.messages.len() > 1 {
            let group_len = self.leading_group_len();
            if group_len >= self.messages.len() {
                break;
            }
            self.messages.drain(0..group_len);
        }
    }

    /// Length of the maximal leading group to drop as one unit:
    /// - a leading `tool` message drops the whole contiguous run of `tool`
    ///   messages;
    /// - a leading assistant-with-tool-calls message drops itself plus
    ///   every immediately following `tool` message;
    /// - otherwise, a single message.
    fn leading_group_len(&self) -> usize {
        match self.messages.first() {
            Some(first) if first.role == "tool" => self
                .messages
                .iter()
                .take_while(|m| m.role == "tool")
                .count(),
            Some(first) if first.role == "assistant" && first.tool_calls.is_some() => {
                1 + self.messages[1..]
                    .iter()
                    .take_while(|m| m.role == "tool")
                    .count()
            }
            _ => 1,
        }
    }

    /// The buffer as sent to the chat-completion API: system prompt
    /// prepended, followed by the retained messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(ChatMessage::system(self.system_prompt.clone()));
        out.extend(self.messages.iter().cloned());
        out
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
