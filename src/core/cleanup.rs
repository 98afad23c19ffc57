//! 延迟清理槽位（PendingCleanup）
//!
//! 同一时刻最多一个待执行的清理；每次 arm 生成新的 generation 并作废旧 token。
//! 定时任务触发前必须用 `take_if_current` 确认自己仍是当前槽位，避免旧定时器误触发。

use tokio_util::sync::CancellationToken;

/// 已登记的延迟清理
#[derive(Debug)]
struct PendingCleanup {
    generation: u64,
    token: CancellationToken,
}

/// 清理槽位：持有当前（可选）延迟清理
#[derive(Debug, Default)]
pub struct CleanupSlot {
    armed: Option<PendingCleanup>,
    next_generation: u64,
}

impl CleanupSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新的延迟清理，替换（并取消）之前的；返回 generation 与定时任务使用的 token
    pub fn arm(&mut self) -> (u64, CancellationToken) {
        self.cancel();
        self.next_generation += 1;
        let token = CancellationToken::new();
        self.armed = Some(PendingCleanup {
            generation: self.next_generation,
            token: token.clone(),
        });
        (self.next_generation, token)
    }

    /// 取消当前清理；未登记时为 no-op。返回是否真的取消了一个
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 定时器触发时调用：仅当 generation 仍为当前值时取走槽位并返回 true
    pub fn take_if_current(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(pending) if pending.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_when_empty_is_noop() {
        let mut slot = CleanupSlot::new();
        assert!(!slot.cancel());
        assert!(!slot.cancel());
        assert!(!slot.is_armed());
    }

    #[test]
    fn test_cancel_invalidates_token() {
        let mut slot = CleanupSlot::new();
        let (generation, token) = slot.arm();
        assert!(slot.is_armed());
        assert!(slot.cancel());
        assert!(token.is_cancelled());
        assert!(!slot.take_if_current(generation));
    }

    #[test]
    fn test_rearm_makes_old_generation_stale() {
        let mut slot = CleanupSlot::new();
        let (old_gen, old_token) = slot.arm();
        let (new_gen, new_token) = slot.arm();
        assert!(old_token.is_cancelled());
        assert!(!new_token.is_cancelled());
        assert!(!slot.take_if_current(old_gen));
        assert!(slot.take_if_current(new_gen));
        assert!(!slot.is_armed());
        // 只能触发一次
        assert!(!slot.take_if_current(new_gen));
    }
}
