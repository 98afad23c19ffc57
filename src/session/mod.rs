//! 会话层：外部协作者接口、事件契约与重连监管
//!
//! - **GameSession**: 出站聊天 / 命令、角色位置、关闭连接
//! - **Navigator**: 寻路到目标坐标
//! - **ObjectInteractor**: 查找附近的可交互方块（按钮）、转向、激活
//! - **Connector**: 建立一条新连接，返回上述能力与事件流
//!
//! 具体实现见 `bridge`（WebSocket JSON 桥接）与 `mock`（测试用）。

pub mod bridge;
pub mod chat;
pub mod mock;
pub mod supervisor;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::BotError;
use crate::kits::Coordinate;

pub use bridge::{BridgeConnector, LoginInfo};
pub use chat::{ChatAction, ChatRouter};
pub use supervisor::SessionSupervisor;

/// 会话网关发往核心的事件
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// 角色已进入世界（spawn）
    Connected,
    /// 玩家聊天
    Chat { username: String, message: String },
    /// 其它服务器消息（系统消息、私聊回执等）
    Message(String),
    Disconnected(Option<String>),
    Errored(String),
    ActorDied,
    /// 被服务器强制移动（如传送完成）
    ForcedRelocation(Coordinate),
}

/// 世界中可交互的方块
#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub name: String,
    pub position: Coordinate,
}

/// 出站聊天能力（核心与控制台共享）
pub trait GameSession: Send + Sync {
    /// 发送聊天文本；以 `/` 开头即为服务器命令
    fn chat(&self, text: &str) -> Result<(), BotError>;

    /// 角色当前位置（尚未进入世界时为 None）
    fn position(&self) -> Option<Coordinate>;

    /// 关闭连接；随后会收到 Disconnected
    fn close(&self);
}

/// 寻路
#[async_trait]
pub trait Navigator: Send + Sync {
    /// 移动到距 target 不超过 tolerance 的位置；不可达时返回 NavigationFailed
    async fn goto(&self, target: Coordinate, tolerance: f64) -> Result<(), BotError>;
}

/// 方块交互
#[async_trait]
pub trait ObjectInteractor: Send + Sync {
    /// 在角色 radius 范围内查找名称包含 kind 的方块
    async fn find_nearby(&self, kind: &str, radius: f64) -> Result<Option<WorldObject>, BotError>;

    async fn look_at(&self, position: Coordinate) -> Result<(), BotError>;

    async fn activate(&self, object: &WorldObject) -> Result<(), BotError>;
}

/// 一条连接提供给 Sequencer 的全部外部能力
#[derive(Clone)]
pub struct ActorServices {
    pub session: Arc<dyn GameSession>,
    pub navigator: Arc<dyn Navigator>,
    pub interactor: Arc<dyn ObjectInteractor>,
}

/// 新建立的连接：能力 + 事件流
pub struct Connection {
    pub services: ActorServices,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// 建立连接（每次重连都会调用一次）
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, BotError>;
}
