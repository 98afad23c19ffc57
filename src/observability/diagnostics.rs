//! 诊断日志：三个只追加的文本文件
//!
//! - 事件日志（bot_log.txt）
//! - 玩家坐标日志（player_coords.txt）
//! - 机器人坐标日志（bot_coords.txt，由独立定时器写入）
//!
//! 每行以 `%Y-%m-%d %H:%M:%S: ` 开头。写入失败只记 warn，不影响控制流。

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::LogsSection;
use crate::kits::Coordinate;

#[derive(Debug)]
struct LogPaths {
    events: PathBuf,
    player_coords: PathBuf,
    bot_coords: PathBuf,
}

/// 诊断日志句柄（可廉价克隆）；`disabled()` 时只走 tracing
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsLog {
    paths: Option<Arc<LogPaths>>,
}

impl DiagnosticsLog {
    pub fn new(logs: &LogsSection) -> Self {
        Self {
            paths: Some(Arc::new(LogPaths {
                events: logs.event_log.clone(),
                player_coords: logs.player_coords_log.clone(),
                bot_coords: logs.bot_coords_log.clone(),
            })),
        }
    }

    /// 不落盘（测试用）
    pub fn disabled() -> Self {
        Self::default()
    }

    /// 记录一条事件：同时输出到 tracing 与事件日志文件
    pub fn event(&self, message: &str) {
        tracing::info!("{}", message);
        if let Some(paths) = &self.paths {
            append_line(&paths.events, message);
        }
    }

    /// 记录玩家坐标（传送到玩家身边时）
    pub fn player_coords(&self, username: &str, coords: Coordinate) {
        if let Some(paths) = &self.paths {
            append_line(
                &paths.player_coords,
                &format!("Player: {}, Coords: {}", username, coords),
            );
        }
    }

    /// 记录机器人自身坐标
    pub fn bot_coords(&self, coords: Coordinate) {
        if let Some(paths) = &self.paths {
            append_line(&paths.bot_coords, &format!("Bot Coords: {}", coords));
        }
    }
}

fn timestamped(message: &str) -> String {
    format!("{}: {}\n", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"), message)
}

fn append_line(path: &Path, message: &str) {
    if let Err(e) = try_append(path, &timestamped(message)) {
        tracing::warn!("Failed to append to {}: {}", path.display(), e);
    }
}

fn try_append(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())
}

/// 定时记录机器人坐标；position 返回 None（未连接）时跳过
pub fn spawn_coords_logger<F>(
    log: DiagnosticsLog,
    every: Duration,
    position: F,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Option<Coordinate> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval 的第一次 tick 立即返回
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(coords) = position() {
                        log.bot_coords(coords);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs_in(dir: &Path) -> LogsSection {
        LogsSection {
            event_log: dir.join("bot_log.txt"),
            player_coords_log: dir.join("player_coords.txt"),
            bot_coords_log: dir.join("bot_coords.txt"),
        }
    }

    #[test]
    fn test_event_lines_are_appended_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticsLog::new(&logs_in(dir.path()));
        log.event("Bot spawned successfully!");
        log.event("Button pressed");

        let content = std::fs::read_to_string(dir.path().join("bot_log.txt")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": Bot spawned successfully!"));
        // "YYYY-MM-DD HH:MM:SS: "
        assert_eq!(lines[1].find(": Button pressed"), Some(19));
    }

    #[test]
    fn test_coordinate_logs() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticsLog::new(&logs_in(dir.path()));
        log.player_coords("alice", Coordinate::new(1.0, 64.0, -2.5));
        log.bot_coords(Coordinate::new(0.0, 70.0, 0.0));

        let players = std::fs::read_to_string(dir.path().join("player_coords.txt")).unwrap();
        assert!(players.contains("Player: alice, Coords: X=1.00, Y=64.00, Z=-2.50"));
        let bot = std::fs::read_to_string(dir.path().join("bot_coords.txt")).unwrap();
        assert!(bot.contains("Bot Coords: X=0.00, Y=70.00, Z=0.00"));
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let log = DiagnosticsLog::disabled();
        log.event("ignored");
        log.bot_coords(Coordinate::new(0.0, 0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coords_logger_skips_when_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let log = DiagnosticsLog::new(&logs_in(dir.path()));
        let shutdown = CancellationToken::new();
        let connected = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let flag = connected.clone();
        let handle = spawn_coords_logger(
            log,
            Duration::from_secs(10),
            move || {
                flag.load(std::sync::atomic::Ordering::SeqCst)
                    .then(|| Coordinate::new(5.0, 6.0, 7.0))
            },
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(!dir.path().join("bot_coords.txt").exists());

        connected.store(true, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let bot = std::fs::read_to_string(dir.path().join("bot_coords.txt")).unwrap();
        assert_eq!(bot.lines().count(), 1);
    }
}
