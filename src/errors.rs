//! Error types shared across the gateway.

use std::fmt::{Display, Formatter};

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// JSON-RPC 2.0 reserved error codes used by the A2A server.
pub mod rpc_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// JSON-RPC protocol-level failure, carrying its reserved error code.
    Rpc(i64, String),
    /// A guardrail rejected inbound or outbound content.
    Guardrail(String),
    /// Executor (LLM loop / subprocess / mock) failure.
    Executor(String),
    /// Subprocess lifecycle failure (spawn, health probe, invoke).
    Subprocess(String),
    /// Channel adapter failure (Slack / Telegram wire errors).
    Channel(String),
    /// File system or I/O failure.
    Io(String),
}

impl AppError {
    /// Maps this error onto a JSON-RPC error code, defaulting to internal error.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Rpc(code, _) => *code,
            Self::Config(_) | Self::Io(_) => rpc_code::INTERNAL_ERROR,
            Self::Guardrail(_) | Self::Executor(_) | Self::Subprocess(_) | Self::Channel(_) => {
                rpc_code::INTERNAL_ERROR
            }
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Rpc(code, msg) => write!(f, "rpc[{code}]: {msg}"),
            Self::Guardrail(msg) => write!(f, "guardrail: {msg}"),
            Self::Executor(msg) => write!(f, "executor: {msg}"),
            Self::Subprocess(msg) => write!(f, "subprocess: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Rpc(rpc_code::PARSE_ERROR, err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Subprocess(err.to_string())
    }
}
