//! Assembles one concrete executor from config and registers the four
//! task RPC methods against it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::CoreConfig;
use crate::core::executor::llm_executor::LlmExecutor;
use crate::core::executor::mock::MockExecutor;
use crate::core::executor::stub::StubExecutor;
use crate::core::executor::subprocess_executor::SubprocessExecutor;
use crate::core::executor::Executor;
use crate::core::guardrails::GuardrailEngine;
use crate::core::hooks::HookRegistry;
use crate::core::store::TaskStore;
use crate::core::subprocess_runtime::SubprocessRuntime;
use crate::core::task::{Message, Task, TaskState};
use crate::errors::Result;
use crate::llm::client::HttpChatClient;
use crate::llm::EmptyToolExecutor;
use crate::server::rpc::{JsonRpcError, RpcHandler, RpcRouter, SseFrame, SseHandler};

const FRAMEWORKS_BACKED_BY_SUBPROCESS: &[&str] = &["crewai", "langchain"];

/// Assembles the executor named by config and owns the task store and
/// guardrail engine shared across all RPC handlers.
pub struct Runner {
    store: Arc<TaskStore>,
    executor: Arc<dyn Executor>,
    guardrails: Arc<GuardrailEngine>,
    subprocess: Option<Arc<SubprocessRuntime>>,
}

impl Runner {
    /// Picks exactly one executor: mock tools first, then a
    /// subprocess-backed framework, then an in-process LLM loop if a model
    /// resolves, otherwise a stub that names the unmet requirement.
    pub fn build(config: &CoreConfig) -> Self {
        let guardrails = Arc::new(GuardrailEngine::from_scaffold(&config.policy));
        let store = Arc::new(TaskStore::new());

        let (executor, subprocess): (Arc<dyn Executor>, Option<Arc<SubprocessRuntime>>) =
            if config.mock_tools {
                (Arc::new(MockExecutor), None)
            } else if let Some(framework) = config
                .framework
                .as_deref()
                .filter(|f| FRAMEWORKS_BACKED_BY_SUBPROCESS.contains(f))
            {
                let runtime = Arc::new(SubprocessRuntime::new(config.subprocess.clone()));
                let executor = Arc::new(SubprocessExecutor::new(runtime.clone()));
                let _ = framework;
                (executor as Arc<dyn Executor>, Some(runtime))
            } else if let (Some(base_url), Some(model)) =
                (config.model.base_url.clone(), config.model.model.clone())
            {
                let api_key = config
                    .model
                    .api_key_env
                    .as_deref()
                    .map(|var| std::env::var(var).unwrap_or_default())
                    .unwrap_or_default();
                let chat_client = Arc::new(HttpChatClient::new(base_url, api_key, model));
                let system_prompt = config.model.system_prompt.clone().unwrap_or_default();
                let mut executor = LlmExecutor::new(
                    chat_client,
                    Arc::new(EmptyToolExecutor),
                    Arc::new(HookRegistry::new()),
                    system_prompt,
                );
                if let Some(max_iterations) = config.model.max_iterations {
                    executor = executor.with_max_iterations(max_iterations);
                }
                (Arc::new(executor) as Arc<dyn Executor>, None)
            } else {
                let tag = config.framework.clone().unwrap_or_else(|| "none".to_string());
                (Arc::new(StubExecutor::new(tag)) as Arc<dyn Executor>, None)
            };

        Self {
            store,
            executor,
            guardrails,
            subprocess,
        }
    }

    /// Starts the backing subprocess, if this runner is subprocess-backed.
    pub async fn start(&self) -> Result<()> {
        if let Some(runtime) = &self.subprocess {
            runtime.start().await?;
        }
        Ok(())
    }

    /// Stops the backing subprocess and closes the executor.
    pub async fn stop(&self) -> Result<()> {
        if let Some(runtime) = &self.subprocess {
            runtime.stop().await?;
        }
        self.executor.close().await
    }

    pub fn task_store(&self) -> Arc<TaskStore> {
        self.store.clone()
    }

    /// The backing subprocess runtime, if this runner is subprocess-backed.
    pub fn subprocess_runtime(&self) -> Option<Arc<SubprocessRuntime>> {
        self.subprocess.clone()
    }

    /// Registers `tasks/send`, `tasks/sendSubscribe`, `tasks/get`, and
    /// `tasks/cancel` against `router`.
    pub fn register(&self, router: &mut RpcRouter) {
        router.register(
            "tasks/send",
            Arc::new(TasksSendHandler {
                store: self.store.clone(),
                executor: self.executor.clone(),
                guardrails: self.guardrails.clone(),
            }),
        );
        router.register(
            "tasks/get",
            Arc::new(TasksGetHandler {
                store: self.store.clone(),
            }),
        );
        router.register(
            "tasks/cancel",
            Arc::new(TasksCancelHandler {
                store: self.store.clone(),
            }),
        );
        router.register_sse(
            "tasks/sendSubscribe",
            Arc::new(TasksSendSubscribeHandler {
                store: self.store.clone(),
                executor: self.executor.clone(),
                guardrails: self.guardrails.clone(),
            }),
        );
    }
}

#[derive(Debug, Deserialize)]
struct SendParams {
    id: String,
    message: Message,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> std::result::Result<T, JsonRpcError> {
    serde_json::from_value(params).map_err(|err| JsonRpcError::invalid_params(err.to_string()))
}

struct TasksSendHandler {
    store: Arc<TaskStore>,
    executor: Arc<dyn Executor>,
    guardrails: Arc<GuardrailEngine>,
}

impl TasksSendHandler {
    /// Runs one non-streaming turn to completion, returning the final task
    /// whether it completed, failed, or was rejected by a guardrail.
    async fn run(
        store: &TaskStore,
        executor: &dyn Executor,
        guardrails: &GuardrailEngine,
        id: String,
        message: Message,
    ) -> Task {
        let mut task = Task::new_submitted(id, message.clone());

        if let Err(err) = guardrails.check(&message.text_content()) {
            task.fail(format!("Guardrail violation: {err}"));
            store.put(task.clone()).await;
            return task;
        }

        task.set_state(TaskState::Working);
        store.put(task.clone()).await;

        match executor.execute(&task, &message).await {
            Ok(response) => {
                if let Err(err) = guardrails.check(&response.text_content()) {
                    task.fail(format!("Outbound guardrail violation: {err}"));
                } else {
                    task.complete(response);
                }
            }
            Err(err) => task.fail(err.to_string()),
        }

        store.put(task.clone()).await;
        task
    }
}

#[async_trait]
impl RpcHandler for TasksSendHandler {
    async fn handle(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: SendParams = parse_params(params)?;
        let task = Self::run(&self.store, self.executor.as_ref(), &self.guardrails, params.id, params.message).await;
        serde_json::to_value(task).map_err(|err| JsonRpcError::internal(err.to_string()))
    }
}

struct TasksGetHandler {
    store: Arc<TaskStore>,
}

#[async_trait]
impl RpcHandler for TasksGetHandler {
    async fn handle(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: IdParams = parse_params(params)?;
        let task = self
            .store
            .get(&params.id)
            .await
            .ok_or_else(|| JsonRpcError::invalid_params(format!("task not found: {}", params.id)))?;
        serde_json::to_value(task).map_err(|err| JsonRpcError::internal(err.to_string()))
    }
}

struct TasksCancelHandler {
    store: Arc<TaskStore>,
}

#[async_trait]
impl RpcHandler for TasksCancelHandler {
    async fn handle(&self, params: Value) -> std::result::Result<Value, JsonRpcError> {
        let params: IdParams = parse_params(params)?;
        if !self.store.update_status(&params.id, TaskState::Canceled).await {
            return Err(JsonRpcError::invalid_params(format!("task not found: {}", params.id)));
        }
        let task = self
            .store
            .get(&params.id)
            .await
            .ok_or_else(|| JsonRpcError::internal("task vanished after cancel".to_string()))?;
        serde_json::to_value(task).map_err(|err| JsonRpcError::internal(err.to_string()))
    }
}

struct TasksSendSubscribeHandler {
    store: Arc<TaskStore>,
    executor: Arc<dyn Executor>,
    guardrails: Arc<GuardrailEngine>,
}

impl TasksSendSubscribeHandler {
    async fn emit(tx: &mpsc::Sender<SseFrame>, event: &str, task: &Task) {
        if tx
            .send(SseFrame {
                event: event.to_string(),
                data: serde_json::to_value(task).unwrap_or(Value::Null),
            })
            .await
            .is_err()
        {
            warn!("sse receiver dropped before task reached a terminal state");
        }
    }
}

#[async_trait]
impl SseHandler for TasksSendSubscribeHandler {
    /// Streams `status` frames for every intermediate state and a final
    /// `result` frame once the task reaches a terminal state. Streaming is
    /// coalesced to one final delta per executor, so every non-terminal
    /// item yielded by the executor is reported as a
    /// `status` frame and the last one observed becomes the completion.
    async fn handle(&self, params: Value, tx: mpsc::Sender<SseFrame>) {
        let params: SendParams = match parse_params(params) {
            Ok(params) => params,
            Err(err) => {
                warn!(error = %err.message, "sendSubscribe received invalid params");
                return;
            }
        };

        let mut task = Task::new_submitted(params.id, params.message.clone());
        Self::emit(&tx, "status", &task).await;

        if let Err(err) = self.guardrails.check(&params.message.text_content()) {
            task.fail(format!("Guardrail violation: {err}"));
            self.store.put(task.clone()).await;
            Self::emit(&tx, "result", &task).await;
            return;
        }

        task.set_state(TaskState::Working);
        self.store.put(task.clone()).await;
        Self::emit(&tx, "status", &task).await;

        let mut stream = match self.executor.execute_stream(&task, &params.message).await {
            Ok(stream) => stream,
            Err(err) => {
                task.fail(err.to_string());
                self.store.put(task.clone()).await;
                Self::emit(&tx, "result", &task).await;
                return;
            }
        };

        let mut last = None;
        loop {
            match tokio_stream::StreamExt::next(&mut stream).await {
                Some(Ok(message)) => {
                    last = Some(message);
                }
                Some(Err(err)) => {
                    task.fail(err.to_string());
                    self.store.put(task.clone()).await;
                    Self::emit(&tx, "result", &task).await;
                    return;
                }
                None => break,
            }
        }

        match last {
            Some(response) => {
                if let Err(err) = self.guardrails.check(&response.text_content()) {
                    task.fail(format!("Outbound guardrail violation: {err}"));
                } else {
                    task.complete(response);
                }
            }
            None => task.fail("executor produced no response"),
        }

        self.store.put(task.clone()).await;
        Self::emit(&tx, "result", &task).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, CapabilitiesConfig, ModelConfig, SubprocessConfig};

    fn base_config() -> CoreConfig {
        CoreConfig {
            agent: AgentConfig {
                name: "demo".to_string(),
                description: String::new(),
                url: "http://localhost:41241".to_string(),
                skills: Vec::new(),
                capabilities: CapabilitiesConfig::default(),
            },
            framework: None,
            mock_tools: true,
            model: ModelConfig::default(),
            subprocess: SubprocessConfig::default(),
            channels: Vec::new(),
            policy: Default::default(),
            watch: Default::default(),
            host: "0.0.0.0".to_string(),
            port: 41241,
        }
    }

    #[tokio::test]
    async fn tasks_send_with_mock_tools_completes_immediately() {
        let runner = Runner::build(&base_config());
        let mut router = RpcRouter::new();
        runner.register(&mut router);

        let handler = router.handler("tasks/send").unwrap();
        let result = handler
            .handle(serde_json::json!({
                "id": "t1",
                "message": {"role": "user", "parts": [{"kind": "text", "text": "hello"}]}
            }))
            .await
            .unwrap();
        assert_eq!(result["status"]["state"], "completed");
    }

    #[tokio::test]
    async fn tasks_get_reports_not_found_for_unknown_id() {
        let runner = Runner::build(&base_config());
        let mut router = RpcRouter::new();
        runner.register(&mut router);

        let handler = router.handler("tasks/get").unwrap();
        let err = handler.handle(serde_json::json!({"id": "missing"})).await.unwrap_err();
        assert_eq!(err.code, crate::errors::rpc_code::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tasks_cancel_transitions_existing_task() {
        let runner = Runner::build(&base_config());
        let mut router = RpcRouter::new();
        runner.register(&mut router);

        router
            .handler("tasks/send")
            .unwrap()
            .handle(serde_json::json!({
                "id": "t2",
                "message": {"role": "user", "parts": [{"kind": "text", "text": "hi"}]}
            }))
            .await
            .unwrap();

        let result = router
            .handler("tasks/cancel")
            .unwrap()
            .handle(serde_json::json!({"id": "t2"}))
            .await
            .unwrap();
        assert_eq!(result["status"]["state"], "canceled");
    }

    #[tokio::test]
    async fn guardrail_violation_yields_failed_task_with_prefixed_message() {
        let mut config = base_config();
        config.policy.guardrails.push(crate::config::GuardrailDescriptor {
            kind: "content_filter".to_string(),
            config: [(
                "blocked_words".to_string(),
                serde_json::json!(["FORBIDDEN"]),
            )]
            .into_iter()
            .collect(),
            mode: crate::config::GuardrailMode::Enforce,
        });
        let runner = Runner::build(&config);
        let mut router = RpcRouter::new();
        runner.register(&mut router);

        let result = router
            .handler("tasks/send")
            .unwrap()
            .handle(serde_json::json!({
                "id": "t3",
                "message": {"role": "user", "parts": [{"kind": "text", "text": "this is FORBIDDEN"}]}
            }))
            .await
            .unwrap();
        assert_eq!(result["status"]["state"], "failed");
        let text = result["status"]["message"]["parts"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Guardrail violation:"));
    }

    #[tokio::test]
    async fn tasks_send_subscribe_streams_status_then_result() {
        let runner = Runner::build(&base_config());
        let mut router = RpcRouter::new();
        runner.register(&mut router);

        let handler = router.sse_handler("tasks/sendSubscribe").unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        handler
            .handle(
                serde_json::json!({
                    "id": "t4",
                    "message": {"role": "user", "parts": [{"kind": "text", "text": "hi"}]}
                }),
                tx,
            )
            .await;

        let mut events = Vec::new();
        while let Some(frame) = rx.recv().await {
            events.push(frame.event);
        }
        assert_eq!(events.last().unwrap(), "result");
        assert!(events.contains(&"status".to_string()));
    }
}
