//! Mock 会话（用于测试，无需游戏服务器）
//!
//! MockSession 记录所有出站聊天；MockNavigator / MockInteractor 按预设结果应答；
//! MockConnector 依次交出预先准备好的连接，并统计连接次数。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::core::BotError;
use crate::kits::Coordinate;
use crate::session::{
    ActorServices, Connection, Connector, GameSession, Navigator, ObjectInteractor, SessionEvent,
    WorldObject,
};

/// 记录出站聊天的会话
#[derive(Debug, Default)]
pub struct MockSession {
    sent: Mutex<Vec<String>>,
    position: Mutex<Option<Coordinate>>,
    closed: AtomicBool,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已发送的全部聊天 / 命令
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 发给某个玩家的私聊内容（去掉 `/msg <name> ` 前缀）
    pub fn whispers_to(&self, player: &str) -> Vec<String> {
        let prefix = format!("/msg {} ", player);
        self.sent()
            .iter()
            .filter_map(|m| m.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    pub fn set_position(&self, position: Option<Coordinate>) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl GameSession for MockSession {
    fn chat(&self, text: &str) -> Result<(), BotError> {
        if self.is_closed() {
            return Err(BotError::SessionDropped);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(text.to_string());
        Ok(())
    }

    fn position(&self) -> Option<Coordinate> {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// 预设结果的寻路器；gated 模式下每次 goto 等待一次 notify
#[derive(Debug, Default)]
pub struct MockNavigator {
    calls: Mutex<Vec<(Coordinate, f64)>>,
    failure: Option<String>,
    gate: Option<Arc<Notify>>,
}

impl MockNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::default()
        }
    }

    /// 返回寻路器与放行句柄
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Self {
                gate: Some(gate.clone()),
                ..Self::default()
            },
            gate,
        )
    }

    pub fn calls(&self) -> Vec<(Coordinate, f64)> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Navigator for MockNavigator {
    async fn goto(&self, target: Coordinate, tolerance: f64) -> Result<(), BotError> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push((target, tolerance));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.failure {
            Some(reason) => Err(BotError::NavigationFailed(reason.clone())),
            None => Ok(()),
        }
    }
}

/// 预设按钮的交互器
#[derive(Debug, Default)]
pub struct MockInteractor {
    button: Option<WorldObject>,
    looked_at: Mutex<Vec<Coordinate>>,
    activations: AtomicUsize,
}

impl MockInteractor {
    pub fn with_button(button: WorldObject) -> Self {
        Self {
            button: Some(button),
            ..Self::default()
        }
    }

    /// 附近没有按钮
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn looked_at(&self) -> Vec<Coordinate> {
        self.looked_at.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectInteractor for MockInteractor {
    async fn find_nearby(&self, kind: &str, _radius: f64) -> Result<Option<WorldObject>, BotError> {
        Ok(self.button.clone().filter(|b| b.name.contains(kind)))
    }

    async fn look_at(&self, position: Coordinate) -> Result<(), BotError> {
        self.looked_at.lock().unwrap_or_else(PoisonError::into_inner).push(position);
        Ok(())
    }

    async fn activate(&self, _object: &WorldObject) -> Result<(), BotError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 测试端持有的一条 mock 连接
pub struct MockLink {
    pub session: Arc<MockSession>,
    pub navigator: Arc<MockNavigator>,
    pub interactor: Arc<MockInteractor>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// 依次交出预先准备的连接
#[derive(Default)]
pub struct MockConnector {
    prepared: Mutex<VecDeque<Connection>>,
    attempts: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 准备一条连接，返回测试端句柄
    pub fn prepare(&self, navigator: MockNavigator, interactor: MockInteractor) -> MockLink {
        let session = Arc::new(MockSession::new());
        let navigator = Arc::new(navigator);
        let interactor = Arc::new(interactor);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.prepared.lock().unwrap_or_else(PoisonError::into_inner).push_back(Connection {
            services: ActorServices {
                session: session.clone(),
                navigator: navigator.clone(),
                interactor: interactor.clone(),
            },
            events: events_rx,
        });
        MockLink {
            session,
            navigator,
            interactor,
            events: events_tx,
        }
    }

    /// connect 被调用的次数
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection, BotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.prepared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| BotError::SessionFailed("no mock connection prepared".into()))
    }
}
