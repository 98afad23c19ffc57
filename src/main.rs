//! Kitbot
//!
//! 入口：初始化日志、加载配置、启动会话监管、坐标记录与运维控制台。
//! 用法：`kitbot [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use kitbot::config::load_config;
use kitbot::console::{spawn_stdin_reader, Console};
use kitbot::core::{RequestQueue, SequencerSettings, ShutdownManager};
use kitbot::kits::KitCatalog;
use kitbot::observability::{self, spawn_coords_logger, DiagnosticsLog};
use kitbot::session::{BridgeConnector, ChatRouter, SessionSupervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    cfg.validate().context("Config error")?;

    let log = DiagnosticsLog::new(&cfg.logs);
    observability::install_panic_hook(log.clone());
    let catalog = Arc::new(KitCatalog::from_config(&cfg.kits));
    tracing::info!("Loaded {} kits: {}", catalog.len(), catalog.ids().join(", "));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    // 队列与目录为进程级状态，重连时原样传给新的 Sequencer
    let supervisor = Arc::new(SessionSupervisor::new(
        Arc::new(BridgeConnector::from_config(&cfg)),
        Arc::new(RequestQueue::new()),
        catalog,
        SequencerSettings::from_config(&cfg),
        ChatRouter::from_config(&cfg),
        log.clone(),
        cfg.timing.reconnect_delay(),
    ));

    let position_source = supervisor.clone();
    spawn_coords_logger(
        log.clone(),
        cfg.timing.coords_log_interval(),
        move || position_source.actor_position(),
        shutdown.token(),
    );

    let console = Console::new(supervisor.clone(), shutdown.clone(), log);
    tokio::spawn(console.run(spawn_stdin_reader()));

    supervisor.run(shutdown.token()).await;
    match shutdown.reason() {
        Some(reason) => tracing::info!("Bot stopped ({:?})", reason),
        None => tracing::info!("Bot stopped"),
    }
    Ok(())
}
