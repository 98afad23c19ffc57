//! 机器人错误类型与重置原因
//!
//! 工作流级错误（导航 / 交互）在 Sequencer 的工作流边界被捕获并回复给请求者；
//! 会话级错误（连接错误 / 断线）交给 SessionSupervisor 处理重连。

use std::fmt;

use thiserror::Error;

/// 运行过程中可能出现的错误；Display 文本会直接回复给请求者
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BotError {
    /// 准入失败：kit 标识不在目录中
    #[error("Invalid kit type. Available kits: {}", .available.join(", "))]
    UnknownKit {
        requested: String,
        available: Vec<String>,
    },

    #[error("Pathfinding failed: {0}")]
    NavigationFailed(String),

    #[error("No button found nearby")]
    NoButtonNearby,

    #[error("Button interaction failed: {0}")]
    InteractionFailed(String),

    /// 连接错误（对当前连接是致命的）
    #[error("Session error: {0}")]
    SessionFailed(String),

    #[error("Session dropped")]
    SessionDropped,

    #[error("Bot is not connected yet.")]
    NotConnected,

    /// 工作流被重置事件打断
    #[error("Kit request cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl BotError {
    /// 是否属于会话级错误（需要重连而不是仅回到 Idle）
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            BotError::SessionFailed(_) | BotError::SessionDropped | BotError::NotConnected
        )
    }
}

/// 触发重置（取消延迟清理 + 清除处理标记）的生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileReason {
    /// 角色死亡
    ActorDied,
    /// 连接错误
    ConnectionError,
    /// 断线
    Disconnected,
    /// 进程关闭
    Shutdown,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileReason::ActorDied => "natural death",
            ReconcileReason::ConnectionError => "error",
            ReconcileReason::Disconnected => "disconnect",
            ReconcileReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}
