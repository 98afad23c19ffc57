//! 核心层：请求队列、单飞状态机、延迟清理、错误与关闭

pub mod cleanup;
pub mod error;
pub mod queue;
pub mod sequencer;
pub mod shutdown;
pub mod state;

pub use cleanup::CleanupSlot;
pub use error::{BotError, ReconcileReason};
pub use queue::{Request, RequestQueue};
pub use sequencer::{Sequencer, SequencerSettings};
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::{SequencerPhase, StatusSnapshot};
