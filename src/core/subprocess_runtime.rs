//! Subprocess runtime: spawn, health-probe, invoke, stream, restart,
//! stop a child agent process speaking the same JSON-RPC A2A protocol on
//! loopback. Spawns with `kill_on_drop` and waits for readiness with a
//! cancellable polling loop rather than a bare process wait.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, RwLock};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::SubprocessConfig;
use crate::core::task::Task;
use crate::errors::{AppError, Result};
use crate::server::rpc::{JsonRpcRequest, JsonRpcResponse};

const HEALTH_POLL_INITIAL: Duration = Duration::from_millis(100);
const HEALTH_POLL_MAX: Duration = Duration::from_secs(2);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);
const HEALTH_CLIENT_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Stopped,
    Starting,
    Healthy,
}

struct RunningChild {
    child: Child,
    port: u16,
}

/// Manages one child agent process over its full lifecycle.
pub struct SubprocessRuntime {
    config: SubprocessConfig,
    http: Client,
    state: RwLock<RuntimeState>,
    running: Mutex<Option<RunningChild>>,
}

impl SubprocessRuntime {
    pub fn new(config: SubprocessConfig) -> Self {
        let http = Client::builder()
            .timeout(HEALTH_CLIENT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            http,
            state: RwLock::new(RuntimeState::Stopped),
            running: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Obtains a free TCP port by binding to an ephemeral port and
    /// immediately releasing it.
    async fn pick_free_port() -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|err| AppError::Subprocess(format!("failed to bind ephemeral port: {err}")))?;
        let port = listener
            .local_addr()
            .map_err(|err| AppError::Subprocess(format!("failed to read bound port: {err}")))?
            .port();
        drop(listener);
        Ok(port)
    }

    fn base_url(port: u16) -> String {
        format!("http://127.0.0.1:{port}")
    }

    /// Starts the child process: picks a port, spawns the entrypoint with
    /// `PORT` set, pipes stderr to the logger, and polls `/healthz` until
    /// ready or the 60s deadline elapses.
    pub async fn start(&self) -> Result<()> {
        *self.state.write().await = RuntimeState::Starting;

        let port = Self::pick_free_port().await?;
        let mut parts = self.config.entrypoint.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| AppError::Subprocess("empty entrypoint".to_string()))?;
        let args: Vec<&str> = parts.collect();

        let mut cmd = Command::new(program);
        cmd.args(&args);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        cmd.env("PORT", port.to_string());
        cmd.stdout(std::process::Stdio::inherit());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Subprocess(format!("failed to spawn subprocess: {err}")))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "subprocess.stderr", "{line}");
                }
            });
        }

        *self.running.lock().await = Some(RunningChild { child, port });

        match self.wait_until_healthy(port).await {
            Ok(()) => {
                *self.state.write().await = RuntimeState::Healthy;
                info!(port, "subprocess healthy");
                Ok(())
            }
            Err(err) => {
                self.kill_running().await;
                *self.state.write().await = RuntimeState::Stopped;
                Err(err)
            }
        }
    }

    async fn wait_until_healthy(&self, port: u16) -> Result<()> {
        let deadline = tokio::time::Instant::now() + HEALTH_TIMEOUT;
        let mut backoff = HEALTH_POLL_INITIAL;
        loop {
            if self.probe_health(port).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(AppError::Subprocess(
                    "subprocess failed to become healthy within 60s".to_string(),
                ));
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(HEALTH_POLL_MAX);
        }
    }

    /// `GET /healthz` with a 2s client timeout; non-200 is unhealthy.
    pub async fn probe_health(&self, port: u16) -> bool {
        let url = format!("{}/healthz", Self::base_url(port));
        matches!(self.http.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    pub async fn is_healthy(&self) -> bool {
        if *self.state.read().await != RuntimeState::Healthy {
            return false;
        }
        let guard = self.running.lock().await;
        match guard.as_ref() {
            Some(running) => self.probe_health(running.port).await,
            None => false,
        }
    }

    async fn kill_running(&self) {
        let mut guard = self.running.lock().await;
        if let Some(mut running) = guard.take() {
            let _ = running.child.kill().await;
        }
    }

    /// Sends an interrupt, waits up to 5s, then kills. Idempotent when the
    /// process is already absent.
    pub async fn stop(&self) -> Result<()> {
        let mut guard = self.running.lock().await;
        let Some(mut running) = guard.take() else {
            *self.state.write().await = RuntimeState::Stopped;
            return Ok(());
        };
        drop(guard);

        send_interrupt(&running.child);

        let waited = tokio::time::timeout(STOP_GRACE_PERIOD, running.child.wait()).await;
        if waited.is_err() {
            warn!("subprocess did not exit within grace period, killing");
            let _ = running.child.kill().await;
        }

        *self.state.write().await = RuntimeState::Stopped;
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn current_port(&self) -> Result<u16> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.port)
            .ok_or_else(|| AppError::Subprocess("subprocess is not running".to_string()))
    }

    /// Posts a JSON-RPC `tasks/send` to the child and decodes the result
    /// into a task.
    pub async fn invoke(&self, task_id: &str, message: &crate::core::task::Message) -> Result<Task> {
        let port = self.current_port().await?;
        let request = JsonRpcRequest::new(
            "tasks/send",
            serde_json::json!({ "id": task_id, "message": message }),
        );
        let response = self
            .http
            .post(Self::base_url(port))
            .json(&request)
            .send()
            .await
            .map_err(|err| AppError::Subprocess(format!("subprocess invoke failed: {err}")))?;

        let envelope: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| AppError::Subprocess(format!("invalid subprocess response: {err}")))?;

        if let Some(error) = envelope.error {
            return Err(AppError::Subprocess(format!(
                "subprocess rpc error [{}]: {}",
                error.code, error.message
            )));
        }

        let result = envelope
            .result
            .ok_or_else(|| AppError::Subprocess("subprocess returned no result".to_string()))?;

        serde_json::from_value(result)
            .map_err(|err| AppError::Subprocess(format!("subprocess task malformed: {err}")))
    }

    /// Posts `tasks/sendSubscribe` and forwards decoded tasks. Degrades
    /// gracefully to a one-element stream when the child answers with
    /// plain JSON instead of SSE.
    pub async fn stream(
        self: &Arc<Self>,
        task_id: &str,
        message: &crate::core::task::Message,
    ) -> Result<impl Stream<Item = Result<Task>> + Send + 'static> {
        let port = self.current_port().await?;
        let request = JsonRpcRequest::new(
            "tasks/sendSubscribe",
            serde_json::json!({ "id": task_id, "message": message }),
        );

        let response = self
            .http
            .post(Self::base_url(port))
            .json(&request)
            .send()
            .await
            .map_err(|err| AppError::Subprocess(format!("subprocess stream request failed: {err}")))?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        if !is_sse {
            let envelope: JsonRpcResponse = response
                .json()
                .await
                .map_err(|err| AppError::Subprocess(format!("invalid subprocess response: {err}")))?;
            let result = envelope
                .result
                .ok_or_else(|| AppError::Subprocess("subprocess returned no result".to_string()))?;
            let task: Task = serde_json::from_value(result)
                .map_err(|err| AppError::Subprocess(format!("subprocess task malformed: {err}")))?;
            return Ok(Box::pin(tokio_stream::once(Ok(task)))
                as std::pin::Pin<Box<dyn Stream<Item = Result<Task>> + Send>>);
        }

        let byte_stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|err| AppError::Subprocess(format!("subprocess SSE read failed: {err}")))
        });
        let decoded = parse_sse_tasks(byte_stream);
        Ok(Box::pin(decoded) as std::pin::Pin<Box<dyn Stream<Item = Result<Task>> + Send>>)
    }
}

/// Sends SIGINT on unix; falls back to an immediate kill elsewhere, since
/// there is no portable graceful-termination signal outside unix.
#[cfg(unix)]
fn send_interrupt(child: &Child) {
    if let Some(pid) = child.id() {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        if let Err(err) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGINT) {
            warn!(error = %err, "failed to send SIGINT to subprocess");
        }
    }
}

#[cfg(not(unix))]
fn send_interrupt(_child: &Child) {}

/// Decodes a raw SSE byte stream into `data:`-framed `Task` values,
/// splitting on blank lines.
fn parse_sse_tasks(
    mut bytes: impl Stream<Item = Result<bytes::Bytes>> + Unpin + Send + 'static,
) -> impl Stream<Item = Result<Task>> + Send + 'static {
    async_stream::stream! {
        let mut buffer = String::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(bytes) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Err(err) => {
                    yield Err(err);
                    continue;
                }
            }

            while let Some(pos) = buffer.find("\n\n") {
                let frame = buffer[..pos].to_string();
                buffer.drain(..pos + 2);
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        match serde_json::from_str::<Task>(data) {
                            Ok(task) => yield Ok(task),
                            Err(err) => yield Err(AppError::Subprocess(format!(
                                "malformed SSE task frame: {err}"
                            ))),
                        }
                    }
                }
            }
        }
    }
}
