//! Sequencer 阶段与状态快照
//!
//! 控制台 `status` 只读取 StatusSnapshot（投影），不直接接触 Sequencer 内部状态。

use crate::core::queue::Request;

/// Sequencer 阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SequencerPhase {
    #[default]
    Idle,
    Navigating,
    Interacting,
    /// 已发出传送请求，延迟清理已登记
    AwaitingCleanup,
}

impl SequencerPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SequencerPhase::Idle => "Idle",
            SequencerPhase::Navigating => "Navigating",
            SequencerPhase::Interacting => "Interacting",
            SequencerPhase::AwaitingCleanup => "Awaiting cleanup",
        }
    }
}

/// 某一时刻的状态投影
#[derive(Clone, Debug, Default)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub phase: SequencerPhase,
    pub processing: bool,
    pub in_flight: Option<Request>,
    pub cleanup_armed: bool,
    pub queue: Vec<Request>,
}
