//! Typed observability callbacks around LLM and tool calls: a plain
//! `Vec` of boxed callbacks invoked in registration order, no return value.

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{ChatCompletionResponse, ChatMessage};

/// The variable bag passed to observability callbacks.
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub messages: Vec<ChatMessage>,
    pub response: Option<ChatCompletionResponse>,
    pub tool_name: Option<String>,
    pub tool_input: Option<Value>,
    pub tool_output: Option<String>,
    pub error: Option<String>,
}

type HookFn = Arc<dyn Fn(&HookContext) + Send + Sync>;

/// Registry of callbacks for the four LLM-loop hook points plus error
/// observation. Each `fire_*` method runs every registered callback for
/// that point, in registration order.
#[derive(Clone, Default)]
pub struct HookRegistry {
    before_llm_call: Vec<HookFn>,
    after_llm_call: Vec<HookFn>,
    before_tool_exec: Vec<HookFn>,
    after_tool_exec: Vec<HookFn>,
    on_error: Vec<HookFn>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_llm_call<F: Fn(&HookContext) + Send + Sync + 'static>(&mut self, f: F) {
        self.before_llm_call.push(Arc::new(f));
    }

    pub fn on_after_llm_call<F: Fn(&HookContext) + Send + Sync + 'static>(&mut self, f: F) {
        self.after_llm_call.push(Arc::new(f));
    }

    pub fn on_before_tool_exec<F: Fn(&HookContext) + Send + Sync + 'static>(&mut self, f: F) {
        self.before_tool_exec.push(Arc::new(f));
    }

    pub fn on_after_tool_exec<F: Fn(&HookContext) + Send + Sync + 'static>(&mut self, f: F) {
        self.after_tool_exec.push(Arc::new(f));
    }

    pub fn on_error<F: Fn(&HookContext) + Send + Sync + 'static>(&mut self, f: F) {
        self.on_error.push(Arc::new(f));
    }

    pub fn fire_before_llm_call(&self, ctx: &HookContext) {
        self.before_llm_call.iter().for_each(|f| f(ctx));
    }

    pub fn fire_after_llm_call(&self, ctx: &HookContext) {
        self.after_llm_call.iter().for_each(|f| f(ctx));
    }

    pub fn fire_before_tool_exec(&self, ctx: &HookContext) {
        self.before_tool_exec.iter().for_each(|f| f(ctx));
    }

    pub fn fire_after_tool_exec(&self, ctx: &HookContext) {
        self.after_tool_exec.iter().for_each(|f| f(ctx));
    }

    pub fn fire_on_error(&self, ctx: &HookContext) {
        self.on_error.iter().for_each(|f| f(ctx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fires_registered_hooks_in_order() {
        let mut registry = HookRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        registry.on_before_llm_call(move |_ctx| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.fire_before_llm_call(&HookContext::default());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_hook_points_are_no_ops() {
        let registry = HookRegistry::new();
        registry.fire_on_error(&HookContext {
            error: Some("boom".to_string()),
            ..Default::default()
        });
    }
}
