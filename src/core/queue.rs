//! Kit 请求队列（FIFO，进程级，跨重连保留）
//!
//! 只由 Sequencer 修改：准入时入队、开始处理时出队。同一玩家可以有多个排队项。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};

/// 一次 kit 请求
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// 请求者（玩家名）
    pub requester: String,
    /// 目录中的 kit 标识
    pub kit: String,
    pub requested_at: DateTime<Local>,
}

impl Request {
    pub fn new(requester: impl Into<String>, kit: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            kit: kit.into(),
            requested_at: Local::now(),
        }
    }
}

/// 按到达顺序排列的请求队列
#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Request>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 追加到队尾，返回入队后的位置（从 1 开始）
    pub(crate) fn push(&self, request: Request) -> usize {
        let mut entries = self.lock();
        entries.push_back(request);
        entries.len()
    }

    pub(crate) fn pop_front(&self) -> Option<Request> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 当前排队内容的拷贝（队首在前）
    pub fn snapshot(&self) -> Vec<Request> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_positions() {
        let queue = RequestQueue::new();
        assert_eq!(queue.push(Request::new("alice", "pvp")), 1);
        assert_eq!(queue.push(Request::new("bob", "totem")), 2);
        assert_eq!(queue.push(Request::new("alice", "Dye")), 3);

        assert_eq!(queue.pop_front().unwrap().requester, "alice");
        assert_eq!(queue.pop_front().unwrap().requester, "bob");
        let last = queue.pop_front().unwrap();
        assert_eq!((last.requester.as_str(), last.kit.as_str()), ("alice", "Dye"));
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_snapshot_does_not_drain() {
        let queue = RequestQueue::new();
        queue.push(Request::new("carol", "cpvp"));
        assert_eq!(queue.snapshot().len(), 1);
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_empty());
    }
}
