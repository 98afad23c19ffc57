//! 可观测性：tracing 初始化 + 诊断日志文件

mod diagnostics;

pub use diagnostics::{spawn_coords_logger, DiagnosticsLog};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

/// 未捕获的 panic 记入诊断日志；tokio 任务中的 panic 不会终止进程
pub fn install_panic_hook(log: DiagnosticsLog) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log.event(&format!("Uncaught panic: {}", info));
        default_hook(info);
    }));
}
