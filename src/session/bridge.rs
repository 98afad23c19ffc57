//! WebSocket JSON 桥接客户端
//!
//! 游戏协议、寻路与方块搜索由外部桥接进程负责；本模块通过一条 WebSocket 连接
//! 收发 JSON 帧（`op` 字段区分类型），实现 GameSession / Navigator / ObjectInteractor。
//!
//! 需要应答的命令带 `id`，桥接进程以 `{"op":"result","id":..}` 回复。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::BotError;
use crate::kits::Coordinate;
use crate::session::{
    ActorServices, Connection, Connector, GameSession, Navigator, ObjectInteractor, SessionEvent,
    WorldObject,
};

/// 登录信息（连接建立后第一帧）
#[derive(Debug, Clone, Serialize)]
pub struct LoginInfo {
    pub host: String,
    pub username: String,
    pub auth: String,
    pub version: String,
}

/// 发往桥接进程的帧
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeCommand {
    Login(LoginInfo),
    Chat { text: String },
    Goto {
        id: u64,
        target: Coordinate,
        range: f64,
    },
    FindBlock {
        id: u64,
        matching: String,
        max_distance: f64,
    },
    LookAt { id: u64, target: Coordinate },
    ActivateBlock { id: u64, target: Coordinate },
    Quit {},
}

#[derive(Debug, Clone, Deserialize)]
struct BlockInfo {
    name: String,
    position: Coordinate,
}

/// 桥接进程发来的帧
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeFrame {
    Spawn {},
    Chat { username: String, message: String },
    Message { text: String },
    Death {},
    ForcedMove { position: Coordinate },
    Position { position: Coordinate },
    Error { message: String },
    End { reason: Option<String> },
    Result {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        block: Option<BlockInfo>,
    },
}

/// 一次请求的应答
#[derive(Debug)]
struct BridgeReply {
    ok: bool,
    error: Option<String>,
    block: Option<BlockInfo>,
}

type Pending = HashMap<u64, oneshot::Sender<BridgeReply>>;

/// 一条桥接连接（所有能力共享）
#[derive(Debug)]
pub struct BridgeClient {
    out_tx: mpsc::UnboundedSender<BridgeCommand>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
    position: Mutex<Option<Coordinate>>,
    closed: CancellationToken,
    request_timeout: Duration,
}

impl BridgeClient {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, cmd: BridgeCommand) -> Result<(), BotError> {
        if self.closed.is_cancelled() {
            return Err(BotError::SessionDropped);
        }
        self.out_tx.send(cmd).map_err(|_| BotError::SessionDropped)
    }

    /// 发送带 id 的命令并等待应答；timeout 为 None 时一直等待（寻路）
    async fn request(
        &self,
        build: impl FnOnce(u64) -> BridgeCommand,
        timeout: Option<Duration>,
    ) -> Result<BridgeReply, BotError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        if let Err(e) = self.send(build(id)) {
            self.pending().remove(&id);
            return Err(e);
        }

        let reply = match timeout {
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(r) => r,
                Err(_) => {
                    self.pending().remove(&id);
                    return Err(BotError::InteractionFailed(format!(
                        "bridge request timed out after {}s",
                        t.as_secs()
                    )));
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| BotError::SessionDropped)
    }

    /// 路由一帧：应答交给等待者，其余转换为 SessionEvent；返回 false 表示连接结束
    fn route(&self, frame: BridgeFrame, events: &mpsc::UnboundedSender<SessionEvent>) -> bool {
        let event = match frame {
            BridgeFrame::Result {
                id,
                ok,
                error,
                block,
            } => {
                if let Some(tx) = self.pending().remove(&id) {
                    let _ = tx.send(BridgeReply { ok, error, block });
                } else {
                    tracing::debug!("Bridge result for unknown request {}", id);
                }
                return true;
            }
            BridgeFrame::Position { position } => {
                *self.position.lock().unwrap_or_else(PoisonError::into_inner) = Some(position);
                return true;
            }
            BridgeFrame::End { reason } => {
                let _ = events.send(SessionEvent::Disconnected(reason));
                return false;
            }
            BridgeFrame::Spawn {} => SessionEvent::Connected,
            BridgeFrame::Chat { username, message } => SessionEvent::Chat { username, message },
            BridgeFrame::Message { text } => SessionEvent::Message(text),
            BridgeFrame::Death {} => SessionEvent::ActorDied,
            BridgeFrame::ForcedMove { position } => {
                *self.position.lock().unwrap_or_else(PoisonError::into_inner) = Some(position);
                SessionEvent::ForcedRelocation(position)
            }
            BridgeFrame::Error { message } => SessionEvent::Errored(message),
        };
        let _ = events.send(event);
        true
    }

    /// 连接结束：丢弃所有等待中的请求（等待者得到 SessionDropped）
    fn shut(&self) {
        self.closed.cancel();
        self.pending().clear();
    }
}

impl GameSession for BridgeClient {
    fn chat(&self, text: &str) -> Result<(), BotError> {
        self.send(BridgeCommand::Chat {
            text: text.to_string(),
        })
    }

    fn position(&self) -> Option<Coordinate> {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        let _ = self.send(BridgeCommand::Quit {});
    }
}

#[async_trait]
impl Navigator for BridgeClient {
    async fn goto(&self, target: Coordinate, tolerance: f64) -> Result<(), BotError> {
        let reply = self
            .request(
                |id| BridgeCommand::Goto {
                    id,
                    target,
                    range: tolerance,
                },
                None,
            )
            .await?;
        if reply.ok {
            Ok(())
        } else {
            Err(BotError::NavigationFailed(
                reply.error.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }
}

#[async_trait]
impl ObjectInteractor for BridgeClient {
    async fn find_nearby(&self, kind: &str, radius: f64) -> Result<Option<WorldObject>, BotError> {
        let reply = self
            .request(
                |id| BridgeCommand::FindBlock {
                    id,
                    matching: kind.to_string(),
                    max_distance: radius,
                },
                Some(self.request_timeout),
            )
            .await?;
        if !reply.ok {
            return Err(BotError::InteractionFailed(
                reply.error.unwrap_or_else(|| "block search failed".into()),
            ));
        }
        Ok(reply.block.map(|b| WorldObject {
            name: b.name,
            position: b.position,
        }))
    }

    async fn look_at(&self, position: Coordinate) -> Result<(), BotError> {
        let reply = self
            .request(
                |id| BridgeCommand::LookAt {
                    id,
                    target: position,
                },
                Some(self.request_timeout),
            )
            .await?;
        ok_or_interaction(reply)
    }

    async fn activate(&self, object: &WorldObject) -> Result<(), BotError> {
        let target = object.position;
        let reply = self
            .request(
                |id| BridgeCommand::ActivateBlock { id, target },
                Some(self.request_timeout),
            )
            .await?;
        ok_or_interaction(reply)
    }
}

fn ok_or_interaction(reply: BridgeReply) -> Result<(), BotError> {
    if reply.ok {
        Ok(())
    } else {
        Err(BotError::InteractionFailed(
            reply.error.unwrap_or_else(|| "unknown error".into()),
        ))
    }
}

/// 每次 connect 建立一条新的 WebSocket 连接
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    url: String,
    login: LoginInfo,
    request_timeout: Duration,
}

impl BridgeConnector {
    pub fn new(url: impl Into<String>, login: LoginInfo, request_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            login,
            request_timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.bridge.url.clone(),
            LoginInfo {
                host: cfg.account.host.clone(),
                username: cfg.account.username.clone(),
                auth: cfg.account.auth.clone(),
                version: cfg.account.version.clone(),
            },
            Duration::from_secs(cfg.bridge.request_timeout_secs),
        )
    }
}

#[async_trait]
impl Connector for BridgeConnector {
    async fn connect(&self) -> Result<Connection, BotError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| BotError::SessionFailed(format!("connect {}: {}", self.url, e)))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<BridgeCommand>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let client = Arc::new(BridgeClient {
            out_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            position: Mutex::new(None),
            closed: CancellationToken::new(),
            request_timeout: self.request_timeout,
        });
        client.send(BridgeCommand::Login(self.login.clone()))?;
        tracing::info!(url = %self.url, username = %self.login.username, "Bridge connected");

        // 写：命令 → JSON 文本帧；Quit 发出后关闭连接
        let writer_closed = client.closed.clone();
        tokio::spawn(async move {
            loop {
                let cmd = tokio::select! {
                    c = out_rx.recv() => match c {
                        Some(c) => c,
                        None => break,
                    },
                    _ = writer_closed.cancelled() => break,
                };
                let quit = matches!(cmd, BridgeCommand::Quit {});
                let text = match serde_json::to_string(&cmd) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!("Failed to encode bridge command: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::warn!("Bridge write failed: {}", e);
                    break;
                }
                if quit {
                    let _ = sink.close().await;
                    break;
                }
            }
        });

        // 读：JSON 帧 → 应答 / 事件；连接结束时保证发出一次 Disconnected
        let reader = client.clone();
        tokio::spawn(async move {
            let mut ended = false;
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<BridgeFrame>(&text) {
                        Ok(frame) => {
                            if !reader.route(frame, &events_tx) {
                                ended = true;
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Unparseable bridge frame: {} ({})", e, text),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events_tx.send(SessionEvent::Errored(e.to_string()));
                        break;
                    }
                }
            }
            reader.shut();
            if !ended {
                let _ = events_tx.send(SessionEvent::Disconnected(None));
            }
        });

        let services = ActorServices {
            session: client.clone(),
            navigator: client.clone(),
            interactor: client,
        };
        Ok(Connection {
            services,
            events: events_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> (Arc<BridgeClient>, mpsc::UnboundedReceiver<BridgeCommand>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let client = Arc::new(BridgeClient {
            out_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            position: Mutex::new(None),
            closed: CancellationToken::new(),
            request_timeout: Duration::from_secs(30),
        });
        (client, out_rx)
    }

    #[test]
    fn test_command_encoding() {
        let cmd = BridgeCommand::Goto {
            id: 7,
            target: Coordinate::new(1.0, 2.0, 3.0),
            range: 2.0,
        };
        let v: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["op"], "goto");
        assert_eq!(v["id"], 7);
        assert_eq!(v["target"]["y"], 2.0);

        let v = serde_json::to_value(BridgeCommand::Chat { text: "/kill".into() }).unwrap();
        assert_eq!(v, serde_json::json!({"op": "chat", "text": "/kill"}));
    }

    #[test]
    fn test_frames_become_events() {
        let (client, _out) = client();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let frames = [
            r#"{"op":"spawn"}"#,
            r#"{"op":"chat","username":"alice","message":"%kit pvp"}"#,
            r#"{"op":"death"}"#,
            r#"{"op":"forced_move","position":{"x":1.0,"y":2.0,"z":3.0}}"#,
        ];
        for f in frames {
            assert!(client.route(serde_json::from_str(f).unwrap(), &tx));
        }
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Connected);
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Chat { .. }));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::ActorDied);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ForcedRelocation(Coordinate::new(1.0, 2.0, 3.0))
        );
        assert_eq!(client.position(), Some(Coordinate::new(1.0, 2.0, 3.0)));

        let end = serde_json::from_str(r#"{"op":"end","reason":"kicked"}"#).unwrap();
        assert!(!client.route(end, &tx));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Disconnected(Some("kicked".into()))
        );
    }

    #[tokio::test]
    async fn test_request_resolves_with_result_frame() {
        let (client, mut out) = client();
        let (tx, _rx) = mpsc::unbounded_channel();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.find_nearby("button", 3.0).await })
        };
        let sent = out.recv().await.unwrap();
        let id = match sent {
            BridgeCommand::FindBlock {
                id, ref matching, ..
            } => {
                assert_eq!(matching, "button");
                id
            }
            other => panic!("unexpected command {:?}", other),
        };

        let result = format!(
            r#"{{"op":"result","id":{},"ok":true,"block":{{"name":"stone_button","position":{{"x":0.0,"y":1.0,"z":2.0}}}}}}"#,
            id
        );
        client.route(serde_json::from_str(&result).unwrap(), &tx);
        let found = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(found.name, "stone_button");
    }

    #[tokio::test]
    async fn test_navigation_error_and_closed_connection() {
        let (client, mut out) = client();
        let (tx, _rx) = mpsc::unbounded_channel();

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.goto(Coordinate::new(0.0, 0.0, 0.0), 2.0).await })
        };
        let id = match out.recv().await.unwrap() {
            BridgeCommand::Goto { id, .. } => id,
            other => panic!("unexpected command {:?}", other),
        };
        let result = format!(r#"{{"op":"result","id":{},"ok":false,"error":"No path"}}"#, id);
        client.route(serde_json::from_str(&result).unwrap(), &tx);
        assert_eq!(
            waiter.await.unwrap(),
            Err(BotError::NavigationFailed("No path".into()))
        );

        client.shut();
        assert_eq!(client.chat("hi"), Err(BotError::SessionDropped));
    }
}
