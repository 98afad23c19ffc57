//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `KITBOT__*` 覆盖（双下划线表示嵌套，如 `KITBOT__ACCOUNT__USERNAME=me@example.com`）。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::BotError;
use crate::kits::Coordinate;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub account: AccountSection,
    pub admin: AdminSection,
    pub bridge: BridgeSection,
    pub timing: TimingSection,
    pub workflow: WorkflowSection,
    pub logs: LogsSection,
    /// [kits.<id>] 段；为空时使用内置目录
    pub kits: BTreeMap<String, Coordinate>,
}

/// [account] 段：登录身份
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccountSection {
    /// 登录账号（微软认证时为邮箱），必填
    pub username: String,
    pub auth: String,
    pub host: String,
    pub version: String,
}

impl Default for AccountSection {
    fn default() -> Self {
        Self {
            username: String::new(),
            auth: "microsoft".to_string(),
            host: "anarchy.6b6t.org".to_string(),
            version: "1.19.4".to_string(),
        }
    }
}

/// [admin] 段：可通过机器人转发聊天的身份
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminSection {
    pub username: Option<String>,
    pub additional: Vec<String>,
    pub passthrough_prefix: String,
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            username: None,
            additional: Vec::new(),
            passthrough_prefix: "%say ".to_string(),
        }
    }
}

impl AdminSection {
    /// 管理员 + 额外管理员
    pub fn allow_list(&self) -> Vec<String> {
        self.username
            .iter()
            .chain(self.additional.iter())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// [bridge] 段：游戏桥接进程地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub url: String,
    /// 单次查找 / 转向 / 激活请求的超时（秒）；寻路不受此限制
    pub request_timeout_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// [timing] 段：所有固定延迟（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub poll_interval_ms: u64,
    /// 转向按钮后、按下前
    pub settle_ms: u64,
    /// 按下按钮后等待 kit 出现
    pub delivery_wait_ms: u64,
    /// 传送请求后到清理命令
    pub cleanup_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub coords_log_interval_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            settle_ms: 500,
            delivery_wait_ms: 2_000,
            cleanup_delay_ms: 60_000,
            reconnect_delay_ms: 5_000,
            coords_log_interval_ms: 10_000,
        }
    }
}

impl TimingSection {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn coords_log_interval(&self) -> Duration {
        Duration::from_millis(self.coords_log_interval_ms)
    }
}

/// [workflow] 段：触发词、交互参数与命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowSection {
    pub trigger_prefix: String,
    pub goal_tolerance: f64,
    pub button_kind: String,
    pub button_radius: f64,
    pub cleanup_command: String,
    pub teleport_command: String,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            trigger_prefix: "%kit ".to_string(),
            goal_tolerance: 2.0,
            button_kind: "button".to_string(),
            button_radius: 3.0,
            cleanup_command: "/kill".to_string(),
            teleport_command: "/tpa".to_string(),
        }
    }
}

/// [logs] 段：三个诊断日志文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    pub event_log: PathBuf,
    pub player_coords_log: PathBuf,
    pub bot_coords_log: PathBuf,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            event_log: PathBuf::from("bot_log.txt"),
            player_coords_log: PathBuf::from("player_coords.txt"),
            bot_coords_log: PathBuf::from("bot_coords.txt"),
        }
    }
}

impl AppConfig {
    /// 启动前校验：账号必填，延迟与半径必须为正
    pub fn validate(&self) -> Result<(), BotError> {
        if self.account.username.trim().is_empty() {
            return Err(BotError::Config(
                "account.username not configured (set it in config/default.toml or KITBOT__ACCOUNT__USERNAME)".into(),
            ));
        }
        if self.timing.poll_interval_ms == 0 {
            return Err(BotError::Config("timing.poll_interval_ms must be > 0".into()));
        }
        if self.workflow.button_radius <= 0.0 {
            return Err(BotError::Config("workflow.button_radius must be > 0".into()));
        }
        if self.workflow.trigger_prefix.trim().is_empty() {
            return Err(BotError::Config("workflow.trigger_prefix must not be empty".into()));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 KITBOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 KITBOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("KITBOT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("admin.additional")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
