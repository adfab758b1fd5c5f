#![allow(dead_code)]

use serde_json::{json, Value};
use std::io::Write;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn gateway_binary_path() -> TestResult<PathBuf> {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_a2a-gateway") {
        return Ok(PathBuf::from(path));
    }
    let candidate = PathBuf::from("target")
        .join("debug")
        .join(if cfg!(windows) { "a2a-gateway.exe" } else { "a2a-gateway" });
    if candidate.exists() {
        return Ok(candidate);
    }
    Err("could not locate a2a-gateway test binary path".into())
}

/// Spawns the compiled gateway binary against a generated config file and
/// waits for `/healthz` to answer before handing back a driver handle.
pub struct GatewayHarness {
    child: Child,
    _config_dir: tempfile::TempDir,
    pub port: u16,
    pub base_url: String,
}

impl GatewayHarness {
    pub async fn spawn(yaml: &str) -> TestResult<Self> {
        let port = find_free_port()?;
        let config_dir = tempfile::tempdir()?;
        let config_path = config_dir.path().join("agent.yaml");
        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "{}", yaml.replace("__PORT__", &port.to_string()))?;
        drop(file);

        let bin = gateway_binary_path()?;
        let child = Command::new(bin)
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let mut harness = Self {
            child,
            _config_dir: config_dir,
            port,
            base_url: format!("http://127.0.0.1:{port}"),
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    async fn wait_until_ready(&mut self) -> TestResult<()> {
        for _ in 0..80 {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("gateway exited early with status: {status}").into());
            }
            let res = reqwest::Client::new()
                .get(format!("{}/healthz", self.base_url))
                .timeout(Duration::from_millis(700))
                .send()
                .await;
            if matches!(res, Ok(resp) if resp.status().is_success()) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        Err("timed out waiting for gateway readiness".into())
    }

    pub async fn rpc(&self, method: &str, params: Value) -> TestResult<Value> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp = reqwest::Client::new()
            .post(&self.base_url)
            .json(&body)
            .send()
            .await?;
        Ok(resp.json::<Value>().await?)
    }

    /// Posts a streaming RPC and collects the raw SSE body as text (the
    /// harness itself does not need live frame-by-frame delivery).
    pub async fn rpc_sse(&self, method: &str, params: Value) -> TestResult<String> {
        let body = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
        let resp = reqwest::Client::new()
            .post(&self.base_url)
            .json(&body)
            .send()
            .await?;
        Ok(resp.text().await?)
    }
}

impl Drop for GatewayHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn user_message(text: &str) -> Value {
    json!({"role": "user", "parts": [{"kind": "text", "text": text}]})
}
