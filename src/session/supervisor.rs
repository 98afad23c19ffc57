//! 会话监管：连接生命周期与重连
//!
//! 持有 Connector、进程级的 RequestQueue / KitCatalog；每条连接新建一个 Sequencer。
//! 死亡 / 连接错误 / 断线事件先重置 Sequencer（取消延迟清理、清除 processing），再做其余处理；
//! 连接错误会关闭会话并直接结束该连接；断线后等待固定时间重新连接，队列内容保留。

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{
    BotError, ReconcileReason, RequestQueue, Sequencer, SequencerSettings, StatusSnapshot,
};
use crate::kits::{Coordinate, KitCatalog};
use crate::observability::DiagnosticsLog;
use crate::session::{ChatRouter, Connection, Connector, SessionEvent};

/// 一条连接结束的方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    Disconnected,
    Shutdown,
}

pub struct SessionSupervisor {
    connector: Arc<dyn Connector>,
    queue: Arc<RequestQueue>,
    catalog: Arc<KitCatalog>,
    settings: SequencerSettings,
    router: ChatRouter,
    log: DiagnosticsLog,
    reconnect_delay: Duration,
    /// 已进入世界的连接对应的 Sequencer
    current: RwLock<Option<Arc<Sequencer>>>,
}

impl SessionSupervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        queue: Arc<RequestQueue>,
        catalog: Arc<KitCatalog>,
        settings: SequencerSettings,
        router: ChatRouter,
        log: DiagnosticsLog,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            queue,
            catalog,
            settings,
            router,
            log,
            reconnect_delay,
            current: RwLock::new(None),
        }
    }

    pub fn current(&self) -> Option<Arc<Sequencer>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current(&self, sequencer: Option<Arc<Sequencer>>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = sequencer;
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    /// 状态投影（未连接时只有队列）
    pub fn status(&self) -> StatusSnapshot {
        match self.current() {
            Some(seq) => seq.status(),
            None => StatusSnapshot {
                queue: self.queue.snapshot(),
                ..StatusSnapshot::default()
            },
        }
    }

    /// 共享的出站聊天能力（控制台使用）
    pub fn send_chat(&self, text: &str) -> Result<(), BotError> {
        let seq = self.current().ok_or(BotError::NotConnected)?;
        seq.services().session.chat(text)
    }

    /// 机器人当前位置
    pub fn actor_position(&self) -> Option<Coordinate> {
        self.current()?.services().session.position()
    }

    /// 主循环：连接 → 处理事件直到断线 → 等待 → 重连；shutdown 取消后返回
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let end = tokio::select! {
                r = self.connector.connect() => match r {
                    Ok(connection) => self.run_connection(connection, &shutdown).await,
                    Err(e) => {
                        self.log.event(&format!("Error: {}", e));
                        ConnectionEnd::Disconnected
                    }
                },
                _ = shutdown.cancelled() => ConnectionEnd::Shutdown,
            };
            if end == ConnectionEnd::Shutdown {
                break;
            }

            self.log.event(&format!(
                "Bot disconnected. Reconnecting in {} seconds...",
                self.reconnect_delay.as_secs()
            ));
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::info!("Session supervisor stopped");
    }

    /// 处理一条连接的全部事件；返回时该连接的轮询任务已停止
    pub async fn run_connection(
        &self,
        connection: Connection,
        shutdown: &CancellationToken,
    ) -> ConnectionEnd {
        let Connection { services, mut events } = connection;
        let session = services.session.clone();
        let sequencer = Arc::new(Sequencer::new(
            self.queue.clone(),
            self.catalog.clone(),
            services,
            self.settings.clone(),
            self.log.clone(),
        ));
        let conn_token = shutdown.child_token();
        let mut poller = None;

        let end = loop {
            let event = tokio::select! {
                e = events.recv() => e,
                _ = shutdown.cancelled() => {
                    sequencer.reconcile(ReconcileReason::Shutdown);
                    session.close();
                    break ConnectionEnd::Shutdown;
                }
            };
            let Some(event) = event else {
                sequencer.reconcile(ReconcileReason::Disconnected);
                break ConnectionEnd::Disconnected;
            };

            match event {
                SessionEvent::Connected => {
                    if poller.is_none() {
                        self.log.event("Bot spawned successfully!");
                        self.set_current(Some(sequencer.clone()));
                        poller = Some(sequencer.spawn_poller(conn_token.clone()));
                    }
                }
                SessionEvent::Chat { username, message } => {
                    self.router
                        .handle(&sequencer, session.as_ref(), &self.log, &username, &message);
                }
                SessionEvent::Message(text) => {
                    let text = text.trim();
                    self.log.event(&format!("Received message: {}", text));
                    println!("[Chat] {}", text);
                }
                SessionEvent::ActorDied => {
                    self.log.event("Bot died, respawning...");
                    sequencer.reconcile(ReconcileReason::ActorDied);
                }
                SessionEvent::ForcedRelocation(position) => {
                    if let Some(requester) = sequencer.in_flight_requester() {
                        self.log.event(&format!(
                            "Teleported to {} at {}",
                            requester, position
                        ));
                        self.log.player_coords(&requester, position);
                    }
                }
                SessionEvent::Errored(err) => {
                    // 先停轮询：关闭后的会话上不能再出队
                    conn_token.cancel();
                    self.log.event(&format!("Error: {}", err));
                    sequencer.reconcile(ReconcileReason::ConnectionError);
                    session.close();
                    break ConnectionEnd::Disconnected;
                }
                SessionEvent::Disconnected(reason) => {
                    if let Some(reason) = reason {
                        tracing::info!("Disconnect reason: {}", reason);
                    }
                    sequencer.reconcile(ReconcileReason::Disconnected);
                    break ConnectionEnd::Disconnected;
                }
            }
        };

        conn_token.cancel();
        if let Some(handle) = poller {
            let _ = handle.await;
        }
        self.set_current(None);
        end
    }
}
