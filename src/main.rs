mod channels;
mod config;
mod core;
mod errors;
mod llm;
mod logging;
mod server;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::CoreConfig;
use crate::core::agent_card::AgentCardHolder;
use crate::core::runner::Runner;
use crate::core::task::AgentCard;
use crate::core::watcher::FileWatcher;
use crate::server::http::{self, AppState};
use crate::server::rpc::RpcRouter;

fn config_path_from_args() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            if let Some(path) = args.next() {
                return path;
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "agent.yaml".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let (log_tx, _log_rx) = tokio::sync::broadcast::channel(256);
    logging::init_logging_with_tap(Some(log_tx.clone()));

    let config_path = config_path_from_args();
    let config = CoreConfig::load_from_path(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    let cancel = CancellationToken::new();
    let card_holder = Arc::new(AgentCardHolder::new(AgentCard::from_config(&config.agent)));

    let runner = Runner::build(&config);
    runner.start().await.context("failed to start runner")?;

    let mut router = RpcRouter::new();
    runner.register(&mut router);
    let app_state = AppState {
        card: card_holder.clone(),
        router: Arc::new(router),
        log_tap: Some(log_tx),
    };
    let app = http::build_app(app_state);

    let http_cancel = cancel.clone();
    let host = config.host.clone();
    let port = config.port;
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve(&host, port, app, http_cancel.cancelled_owned()).await {
            error!(error = %err, "http server exited with error");
        }
    });

    let channels = build_channels(&config);
    let channels_cancel = cancel.clone();
    let channels_handle = tokio::spawn(async move {
        channels::run_all(channels, channels_cancel).await;
    });

    let watcher_handle = config.watch.enabled.then(|| {
        let watch_dir = config
            .watch
            .work_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let watcher = Arc::new(FileWatcher::new(watch_dir));
        let watcher_cancel = cancel.clone();
        let reload_config_path = config_path.clone();
        let card_holder = card_holder.clone();
        let subprocess = runner.subprocess_runtime();
        tokio::spawn(async move {
            watcher
                .run(watcher_cancel, || {
                    let reload_config_path = reload_config_path.clone();
                    let card_holder = card_holder.clone();
                    let subprocess = subprocess.clone();
                    async move {
                        info!("reloading agent card after detected change");
                        match CoreConfig::load_from_path(&reload_config_path) {
                            Ok(reloaded) => {
                                card_holder.set(AgentCard::from_config(&reloaded.agent)).await;
                            }
                            Err(err) => {
                                error!(error = %err, "failed to re-read config for agent card reload");
                            }
                        }
                        if let Some(subprocess) = &subprocess {
                            info!("restarting subprocess runtime after detected change");
                            if let Err(err) = subprocess.restart().await {
                                error!(error = %err, "failed to restart subprocess runtime after reload");
                            }
                        }
                    }
                })
                .await;
        })
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping gateway");
    cancel.cancel();

    let _ = http_handle.await;
    let _ = channels_handle.await;
    if let Some(handle) = watcher_handle {
        let _ = handle.await;
    }

    runner.stop().await.context("failed to stop runner cleanly")?;
    Ok(())
}

fn build_channels(config: &CoreConfig) -> Vec<Box<dyn channels::ChannelPlugin>> {
    let mut plugins: Vec<Box<dyn channels::ChannelPlugin>> = Vec::new();
    for channel in &config.channels {
        match channel.name.as_str() {
            "slack" => match channels::slack::SlackChannel::from_config(channel) {
                Ok(plugin) => plugins.push(Box::new(plugin)),
                Err(err) => error!(channel = "slack", error = %err, "failed to construct channel"),
            },
            "telegram" => match channels::telegram::TelegramChannel::from_config(channel) {
                Ok(plugin) => plugins.push(Box::new(plugin)),
                Err(err) => error!(channel = "telegram", error = %err, "failed to construct channel"),
            },
            other => warn!(channel = other, "unknown channel name in config, skipping"),
        }
    }
    plugins
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
