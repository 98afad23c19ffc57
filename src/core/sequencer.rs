//! 请求队列与单飞（single-flight）工作流状态机
//!
//! 每条连接一个 Sequencer；RequestQueue 与 KitCatalog 由进程持有并在重连时原样传入。
//!
//! 工作流：Idle → Navigating → Interacting → AwaitingCleanup → Idle。
//! `processing` 在出队前于同一把锁内检查并置位，是启动新工作流的唯一闸门；
//! 清理定时器与工作流都带 generation，过期的定时器 / 工作流不能改动当前状态。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::cleanup::CleanupSlot;
use crate::core::queue::{Request, RequestQueue};
use crate::core::state::{SequencerPhase, StatusSnapshot};
use crate::core::{BotError, ReconcileReason};
use crate::kits::KitCatalog;
use crate::observability::DiagnosticsLog;
use crate::session::ActorServices;

/// 工作流参数（来自 [timing] 与 [workflow]）
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub delivery_wait: Duration,
    pub cleanup_delay: Duration,
    pub goal_tolerance: f64,
    pub button_kind: String,
    pub button_radius: f64,
    pub cleanup_command: String,
    pub teleport_command: String,
}

impl SequencerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let t = &cfg.timing;
        let w = &cfg.workflow;
        Self {
            poll_interval: Duration::from_millis(t.poll_interval_ms),
            settle_delay: Duration::from_millis(t.settle_ms),
            delivery_wait: Duration::from_millis(t.delivery_wait_ms),
            cleanup_delay: Duration::from_millis(t.cleanup_delay_ms),
            goal_tolerance: w.goal_tolerance,
            button_kind: w.button_kind.clone(),
            button_radius: w.button_radius,
            cleanup_command: w.cleanup_command.clone(),
            teleport_command: w.teleport_command.clone(),
        }
    }
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 正在进行的工作流
#[derive(Debug)]
struct WorkflowTicket {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    phase: SequencerPhase,
    processing: bool,
    in_flight: Option<Request>,
    workflow: Option<WorkflowTicket>,
    next_workflow: u64,
    cleanup: CleanupSlot,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.workflow.as_ref().map(|t| t.generation) == Some(generation)
    }

    /// 回到 Idle（所有终止路径都经过这里）
    fn finish(&mut self) {
        self.phase = SequencerPhase::Idle;
        self.processing = false;
        self.in_flight = None;
        if let Some(ticket) = self.workflow.take() {
            ticket.token.cancel();
        }
    }
}

/// 核心状态机
pub struct Sequencer {
    queue: Arc<RequestQueue>,
    catalog: Arc<KitCatalog>,
    services: ActorServices,
    settings: SequencerSettings,
    log: DiagnosticsLog,
    inner: Mutex<Inner>,
}

impl Sequencer {
    pub fn new(
        queue: Arc<RequestQueue>,
        catalog: Arc<KitCatalog>,
        services: ActorServices,
        settings: SequencerSettings,
        log: DiagnosticsLog,
    ) -> Self {
        Self {
            queue,
            catalog,
            services,
            settings,
            log,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn services(&self) -> &ActorServices {
        &self.services
    }

    pub fn is_processing(&self) -> bool {
        self.lock().processing
    }

    pub fn phase(&self) -> SequencerPhase {
        self.lock().phase
    }

    pub fn cleanup_armed(&self) -> bool {
        self.lock().cleanup.is_armed()
    }

    /// 正在处理的请求者
    pub fn in_flight_requester(&self) -> Option<String> {
        self.lock().in_flight.as_ref().map(|r| r.requester.clone())
    }

    pub fn status(&self) -> StatusSnapshot {
        let inner = self.lock();
        StatusSnapshot {
            connected: true,
            phase: inner.phase,
            processing: inner.processing,
            in_flight: inner.in_flight.clone(),
            cleanup_armed: inner.cleanup.is_armed(),
            queue: self.queue.snapshot(),
        }
    }

    /// 私聊回复
    fn whisper(&self, player: &str, text: &str) {
        if let Err(e) = self.services.session.chat(&format!("/msg {} {}", player, text)) {
            tracing::warn!("Failed to message {}: {}", player, e);
        }
    }

    /// 准入：kit 合法则入队并回复位置（从 1 开始），否则回复可选列表且不改动队列
    pub fn admit(&self, requester: &str, raw_kit: &str) -> Result<usize, BotError> {
        let kit = match self.catalog.get(raw_kit) {
            Some(kit) => kit.id.clone(),
            None => {
                let err = BotError::UnknownKit {
                    requested: raw_kit.trim().to_string(),
                    available: self.catalog.ids(),
                };
                self.log.event(&format!(
                    "Rejected kit request from {} for unknown kit '{}'",
                    requester,
                    raw_kit.trim()
                ));
                self.whisper(requester, &err.to_string());
                return Err(err);
            }
        };

        let (position, processing) = {
            let inner = self.lock();
            let position = self.queue.push(Request::new(requester, kit.clone()));
            (position, inner.processing)
        };

        if position == 1 && !processing {
            self.whisper(
                requester,
                &format!("Processing your {} kit request immediately!", kit),
            );
        } else {
            self.whisper(
                requester,
                &format!(
                    "Kit request received! You are number {} in queue. Please wait.",
                    position
                ),
            );
        }
        self.log.event(&format!(
            "New kit request from {} for {} kit (position {} in queue)",
            requester, kit, position
        ));
        Ok(position)
    }

    /// 原子地检查并置位 processing，然后出队
    fn try_begin(&self) -> Option<(Request, u64, CancellationToken)> {
        let mut inner = self.lock();
        if inner.processing {
            return None;
        }
        let request = self.queue.pop_front()?;
        inner.next_workflow += 1;
        let generation = inner.next_workflow;
        let token = CancellationToken::new();
        inner.processing = true;
        inner.phase = SequencerPhase::Navigating;
        inner.in_flight = Some(request.clone());
        inner.workflow = Some(WorkflowTicket {
            generation,
            token: token.clone(),
        });
        Some((request, generation, token))
    }

    /// 一次轮询：空闲且队列非空时处理队首请求，返回是否启动了工作流
    pub async fn poll_once(self: &Arc<Self>) -> bool {
        let Some((request, generation, token)) = self.try_begin() else {
            return false;
        };
        self.run_workflow(request, generation, token).await;
        true
    }

    /// 按固定间隔轮询队列，直到 token 被取消
    pub fn spawn_poller(self: &Arc<Self>, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        this.poll_once().await;
                    }
                    _ = token.cancelled() => break,
                }
            }
        })
    }

    /// 工作流边界：导航 / 交互的任何错误都在这里变成「回复请求者 + 回到 Idle」
    async fn run_workflow(
        self: &Arc<Self>,
        request: Request,
        generation: u64,
        token: CancellationToken,
    ) {
        self.log.event(&format!(
            "Processing {} kit for {}",
            request.kit, request.requester
        ));
        self.whisper(
            &request.requester,
            &format!("Processing your {} kit request...", request.kit),
        );

        let outcome = tokio::select! {
            r = self.deliver(&request, generation) => r,
            _ = token.cancelled() => Err(BotError::Cancelled),
        };

        match outcome {
            Ok(()) => {}
            Err(BotError::Cancelled) => {
                tracing::info!(
                    requester = %request.requester,
                    kit = %request.kit,
                    "Kit workflow aborted by reconciliation"
                );
            }
            Err(e) => self.fail(&request, generation, e),
        }
    }

    async fn deliver(self: &Arc<Self>, request: &Request, generation: u64) -> Result<(), BotError> {
        let kit = self
            .catalog
            .get(&request.kit)
            .ok_or_else(|| BotError::UnknownKit {
                requested: request.kit.clone(),
                available: self.catalog.ids(),
            })?;

        self.services
            .navigator
            .goto(kit.coords, self.settings.goal_tolerance)
            .await?;
        self.set_phase(generation, SequencerPhase::Interacting)?;

        let button = self
            .services
            .interactor
            .find_nearby(&self.settings.button_kind, self.settings.button_radius)
            .await?
            .ok_or(BotError::NoButtonNearby)?;
        self.log.event(&format!(
            "Found {} at position: {}",
            button.name, button.position
        ));

        self.services.interactor.look_at(button.position).await?;
        tokio::time::sleep(self.settings.settle_delay).await;
        self.services.interactor.activate(&button).await?;
        self.log.event("Button pressed");

        self.whisper(&request.requester, "Button pressed. Waiting for kit...");
        tokio::time::sleep(self.settings.delivery_wait).await;

        self.services.session.chat(&format!(
            "{} {}",
            self.settings.teleport_command, request.requester
        ))?;
        self.whisper(
            &request.requester,
            &format!("Got your {} kit! Teleporting to you...", request.kit),
        );
        self.log.event(&format!(
            "Sent teleport request to {} for {} kit delivery",
            request.requester, request.kit
        ));

        self.arm_cleanup(generation)
    }

    fn set_phase(&self, generation: u64, phase: SequencerPhase) -> Result<(), BotError> {
        let mut inner = self.lock();
        if !inner.is_current(generation) {
            return Err(BotError::Cancelled);
        }
        inner.phase = phase;
        Ok(())
    }

    /// 登记延迟清理：到期后发送清理命令并回到 Idle
    fn arm_cleanup(self: &Arc<Self>, generation: u64) -> Result<(), BotError> {
        let (cleanup_generation, token) = {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return Err(BotError::Cancelled);
            }
            inner.phase = SequencerPhase::AwaitingCleanup;
            inner.cleanup.arm()
        };

        let this = Arc::clone(self);
        let delay = self.settings.cleanup_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => this.fire_cleanup(cleanup_generation),
                _ = token.cancelled() => {}
            }
        });
        Ok(())
    }

    fn fire_cleanup(&self, cleanup_generation: u64) {
        {
            let mut inner = self.lock();
            if !inner.cleanup.take_if_current(cleanup_generation) {
                return;
            }
            inner.finish();
        }
        self.log.event(&format!(
            "Executing {} command after {} seconds",
            self.settings.cleanup_command,
            self.settings.cleanup_delay.as_secs()
        ));
        if let Err(e) = self.services.session.chat(&self.settings.cleanup_command) {
            tracing::warn!("Failed to send cleanup command: {}", e);
        }
    }

    /// 工作流失败：通知请求者、取消（理论上不存在的）清理、回到 Idle；请求被丢弃
    fn fail(&self, request: &Request, generation: u64, err: BotError) {
        {
            let mut inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            if inner.cleanup.cancel() {
                self.log.event(&format!(
                    "Canceled scheduled {} command due to error in kit processing",
                    self.settings.cleanup_command
                ));
            }
            inner.finish();
        }
        if err.is_session_level() {
            tracing::warn!("Kit workflow hit a session-level error: {}", err);
        }
        self.log.event(&format!(
            "Error processing kit request for {}: {}",
            request.requester, err
        ));
        self.whisper(
            &request.requester,
            &format!("Sorry, there was an error with your kit request: {}", err),
        );
    }

    /// 生命周期事件重置：取消延迟清理、中止在途工作流、清除 processing。可重复调用
    pub fn reconcile(&self, reason: ReconcileReason) {
        let mut inner = self.lock();
        if inner.cleanup.cancel() {
            self.log.event(&format!(
                "Canceled scheduled {} command due to {}",
                self.settings.cleanup_command, reason
            ));
        }
        if let Some(request) = &inner.in_flight {
            tracing::info!(
                requester = %request.requester,
                kit = %request.kit,
                "Dropping in-flight kit request ({})",
                reason
            );
        }
        inner.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kits::Coordinate;
    use crate::session::mock::{MockInteractor, MockNavigator, MockSession};
    use crate::session::WorldObject;

    struct Fixture {
        seq: Arc<Sequencer>,
        queue: Arc<RequestQueue>,
        session: Arc<MockSession>,
        navigator: Arc<MockNavigator>,
        interactor: Arc<MockInteractor>,
    }

    fn fixture_with(navigator: MockNavigator, interactor: MockInteractor) -> Fixture {
        let queue = Arc::new(RequestQueue::new());
        let session = Arc::new(MockSession::new());
        let navigator = Arc::new(navigator);
        let interactor = Arc::new(interactor);
        let services = ActorServices {
            session: session.clone(),
            navigator: navigator.clone(),
            interactor: interactor.clone(),
        };
        let seq = Arc::new(Sequencer::new(
            queue.clone(),
            Arc::new(KitCatalog::builtin()),
            services,
            SequencerSettings::default(),
            DiagnosticsLog::disabled(),
        ));
        Fixture {
            seq,
            queue,
            session,
            navigator,
            interactor,
        }
    }

    fn button() -> WorldObject {
        WorldObject {
            name: "stone_button".into(),
            position: Coordinate::new(-603983.0, 307.0, -462614.0),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockNavigator::new(), MockInteractor::with_button(button()))
    }

    #[tokio::test]
    async fn test_admit_reports_positions_in_order() {
        let f = fixture();
        assert_eq!(f.seq.admit("alice", "pvp").unwrap(), 1);
        assert_eq!(f.seq.admit("bob", "TOTEM").unwrap(), 2);
        assert_eq!(f.seq.admit("alice", "dye").unwrap(), 3);

        let kits: Vec<_> = f.queue.snapshot().into_iter().map(|r| r.kit).collect();
        assert_eq!(kits, vec!["pvp", "totem", "Dye"]);
        assert_eq!(
            f.session.whispers_to("alice")[0],
            "Processing your pvp kit request immediately!"
        );
        assert_eq!(
            f.session.whispers_to("bob")[0],
            "Kit request received! You are number 2 in queue. Please wait."
        );
    }

    #[tokio::test]
    async fn test_unknown_kit_does_not_touch_queue() {
        let f = fixture();
        let err = f.seq.admit("carol", "doesnotexist").unwrap_err();
        assert!(matches!(err, BotError::UnknownKit { .. }));
        assert!(f.queue.is_empty());
        assert!(!f.seq.is_processing());
        let reply = &f.session.whispers_to("carol")[0];
        assert!(reply.starts_with("Invalid kit type. Available kits: Gapples, pvp"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_workflow_arms_cleanup_then_fires() {
        let f = fixture();
        f.seq.admit("alice", "pvp").unwrap();

        assert!(f.seq.poll_once().await);
        assert!(f.queue.is_empty());
        assert!(f.seq.is_processing());
        assert_eq!(f.seq.phase(), SequencerPhase::AwaitingCleanup);
        assert!(f.seq.cleanup_armed());

        let (target, tolerance) = f.navigator.calls()[0];
        assert_eq!(target, Coordinate::new(-603983.0, 306.0, -462613.0));
        assert_eq!(tolerance, 2.0);
        assert_eq!(f.interactor.activations(), 1);
        assert!(f.session.sent().contains(&"/tpa alice".to_string()));
        assert!(!f.session.sent().contains(&"/kill".to_string()));

        // 清理到期前不会开始下一个请求
        f.seq.admit("bob", "totem").unwrap();
        assert!(!f.seq.poll_once().await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(f.session.sent().last().unwrap(), "/kill");
        assert!(!f.seq.is_processing());
        assert_eq!(f.seq.phase(), SequencerPhase::Idle);
        assert!(f.seq.poll_once().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_returns_to_idle() {
        let f = fixture_with(
            MockNavigator::failing("no path to goal"),
            MockInteractor::with_button(button()),
        );
        f.seq.admit("alice", "pvp").unwrap();
        f.seq.admit("bob", "totem").unwrap();

        assert!(f.seq.poll_once().await);
        assert!(!f.seq.is_processing());
        assert!(!f.seq.cleanup_armed());
        assert_eq!(f.interactor.activations(), 0);
        assert_eq!(
            f.session.whispers_to("alice").last().unwrap(),
            "Sorry, there was an error with your kit request: Pathfinding failed: no path to goal"
        );
        // 失败的请求被丢弃，下一次轮询处理 bob
        assert_eq!(f.queue.snapshot()[0].requester, "bob");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_button_is_reported() {
        let f = fixture_with(MockNavigator::new(), MockInteractor::empty());
        f.seq.admit("alice", "cpvp").unwrap();
        assert!(f.seq.poll_once().await);
        assert!(!f.seq.is_processing());
        assert_eq!(
            f.session.whispers_to("alice").last().unwrap(),
            "Sorry, there was an error with your kit request: No button found nearby"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_cancels_armed_cleanup() {
        let f = fixture();
        f.seq.admit("alice", "pvp").unwrap();
        f.seq.poll_once().await;
        assert!(f.seq.cleanup_armed());

        f.seq.reconcile(ReconcileReason::ActorDied);
        assert!(!f.seq.is_processing());
        assert!(!f.seq.cleanup_armed());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!f.session.sent().contains(&"/kill".to_string()));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let f = fixture();
        f.seq.reconcile(ReconcileReason::Disconnected);
        f.seq.reconcile(ReconcileReason::Disconnected);
        assert!(!f.seq.is_processing());
        assert!(!f.seq.cleanup_armed());
        assert_eq!(f.seq.phase(), SequencerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_aborts_in_flight_navigation() {
        let (navigator, release) = MockNavigator::gated();
        let f = fixture_with(navigator, MockInteractor::with_button(button()));
        f.seq.admit("alice", "pvp").unwrap();

        let seq = f.seq.clone();
        let handle = tokio::spawn(async move { seq.poll_once().await });
        while f.navigator.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(f.seq.is_processing());
        assert_eq!(f.seq.in_flight_requester().as_deref(), Some("alice"));

        f.seq.reconcile(ReconcileReason::ActorDied);
        assert!(handle.await.unwrap());
        release.notify_one();

        assert!(!f.seq.is_processing());
        assert_eq!(f.interactor.activations(), 0);
        // 被重置打断的请求不会收到错误回复
        assert!(f
            .session
            .whispers_to("alice")
            .iter()
            .all(|m| !m.starts_with("Sorry")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_orients_to_button_then_waits_before_teleport() {
        let f = fixture();
        f.seq.admit("alice", "pvp").unwrap();
        let seq = f.seq.clone();
        let worker = tokio::spawn(async move { seq.poll_once().await });

        // settle 期间：已朝向按钮，尚未按下
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.interactor.looked_at(), vec![button().position]);
        assert_eq!(f.interactor.activations(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.interactor.activations(), 1);
        assert_eq!(
            f.session.whispers_to("alice").last().unwrap(),
            "Button pressed. Waiting for kit..."
        );

        // 按下后还要等 delivery_wait 才发送传送请求
        tokio::time::sleep(Duration::from_millis(1_800)).await;
        assert!(!f.session.sent().contains(&"/tpa alice".to_string()));
        assert_eq!(f.seq.phase(), SequencerPhase::Interacting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(f.session.sent().contains(&"/tpa alice".to_string()));
        assert!(worker.await.unwrap());
        assert_eq!(f.seq.phase(), SequencerPhase::AwaitingCleanup);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_error_keeps_queued_requests() {
        let f = fixture();
        f.seq.admit("alice", "pvp").unwrap();
        f.seq.admit("bob", "totem").unwrap();
        assert!(f.seq.poll_once().await);
        assert!(f.seq.cleanup_armed());

        f.seq.reconcile(ReconcileReason::ConnectionError);
        assert!(!f.seq.cleanup_armed());
        assert!(!f.seq.is_processing());
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.queue.snapshot()[0].requester, "bob");
    }
}
