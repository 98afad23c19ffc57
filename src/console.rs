//! 运维控制台：按行读取 stdin
//!
//! 命令：`say <text>`、`cmd <command>`（自动加 `/`）、`status`、`help`、`exit`。
//! stdin 在独立线程中阻塞读取，逐行经 channel 交给异步循环，避免阻塞运行时退出。

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::core::{ShutdownManager, ShutdownReason, StatusSnapshot};
use crate::observability::DiagnosticsLog;
use crate::session::SessionSupervisor;

const HELP: &str = "Available commands:
  say <message>     - Send a chat message
  cmd <command>     - Execute a command (without the / prefix)
  status            - Show bot status and queue
  help              - Show this help message
  exit              - Exit the bot";

/// 一行控制台输入
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Say(String),
    Cmd(String),
    Status,
    Help,
    Exit,
    Empty,
    Unknown,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let input = line.trim();
        match input {
            "" => ConsoleCommand::Empty,
            "help" => ConsoleCommand::Help,
            "status" => ConsoleCommand::Status,
            "exit" => ConsoleCommand::Exit,
            _ => {
                if let Some(text) = input.strip_prefix("say ") {
                    ConsoleCommand::Say(text.to_string())
                } else if let Some(text) = input.strip_prefix("cmd ") {
                    ConsoleCommand::Cmd(text.to_string())
                } else {
                    ConsoleCommand::Unknown
                }
            }
        }
    }
}

/// 渲染 `status` 输出
pub fn render_status(status: &StatusSnapshot) -> String {
    let mut out = format!(
        "Bot status: {}\n",
        if status.processing { "Processing request" } else { "Idle" }
    );
    if !status.connected {
        out.push_str("Connection: offline\n");
    } else if status.processing {
        out.push_str(&format!("Phase: {}\n", status.phase.label()));
        if let Some(req) = &status.in_flight {
            out.push_str(&format!("Current request: {} - {} kit\n", req.requester, req.kit));
        }
        if status.cleanup_armed {
            out.push_str("Cleanup scheduled\n");
        }
    }
    out.push_str(&format!("Queue length: {}\n", status.queue.len()));
    if !status.queue.is_empty() {
        out.push_str("Pending requests:\n");
        for (i, req) in status.queue.iter().enumerate() {
            out.push_str(&format!(
                "  {}. {} - {} kit (requested at {})\n",
                i + 1,
                req.requester,
                req.kit,
                req.requested_at.format("%H:%M:%S")
            ));
        }
    }
    out
}

pub struct Console {
    supervisor: Arc<SessionSupervisor>,
    shutdown: Arc<ShutdownManager>,
    log: DiagnosticsLog,
}

impl Console {
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        shutdown: Arc<ShutdownManager>,
        log: DiagnosticsLog,
    ) -> Self {
        Self {
            supervisor,
            shutdown,
            log,
        }
    }

    /// 执行一条命令，返回要打印的文本；exit 会触发关闭
    pub fn execute(&self, command: ConsoleCommand) -> Option<String> {
        match command {
            ConsoleCommand::Empty => None,
            ConsoleCommand::Help => Some(HELP.to_string()),
            ConsoleCommand::Status => Some(render_status(&self.supervisor.status())),
            ConsoleCommand::Exit => {
                self.shutdown.shutdown(ShutdownReason::UserInitiated);
                Some("Shutting down bot...".to_string())
            }
            ConsoleCommand::Say(message) => Some(match self.supervisor.send_chat(&message) {
                Ok(()) => {
                    self.log.event(&format!("Terminal sent message: {}", message));
                    format!("Message sent: {}", message)
                }
                Err(e) => e.to_string(),
            }),
            ConsoleCommand::Cmd(command) => {
                let command = format!("/{}", command);
                Some(match self.supervisor.send_chat(&command) {
                    Ok(()) => {
                        self.log.event(&format!("Terminal executed command: {}", command));
                        format!("Command executed: {}", command)
                    }
                    Err(e) => e.to_string(),
                })
            }
            ConsoleCommand::Unknown => {
                Some("Unknown command. Type \"help\" for available commands.".to_string())
            }
        }
    }

    /// 消费输入行直到 exit、输入结束或进程关闭
    pub async fn run(self, mut lines: mpsc::UnboundedReceiver<String>) {
        println!("\n===== Kit Bot Terminal Interface =====");
        println!("{}", HELP);
        println!("======================================\n");

        let token = self.shutdown.token();
        loop {
            let line = tokio::select! {
                l = lines.recv() => l,
                _ = token.cancelled() => break,
            };
            let Some(line) = line else {
                println!("Terminal interface closed.");
                self.shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            };
            let command = ConsoleCommand::parse(&line);
            let exit = command == ConsoleCommand::Exit;
            if let Some(output) = self.execute(command) {
                println!("{}", output);
            }
            if exit {
                break;
            }
        }
    }
}

/// 在独立线程中读取 stdin，逐行发送
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        use std::io::BufRead;
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("stdin error: {}", e);
                    break;
                }
            }
        }
    });
    rx
}
