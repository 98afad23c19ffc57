//! 聊天路由：kit 触发词与管理员转发
//!
//! `%kit <id>` 交给 Sequencer 准入；白名单身份的 `%say <text>` 由机器人原样说出
//! （包括 `/` 开头的服务器命令）。转发不经过队列，也不持有状态。

use crate::config::AppConfig;
use crate::core::Sequencer;
use crate::observability::DiagnosticsLog;
use crate::session::GameSession;

/// 对一条玩家聊天的分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAction<'a> {
    KitRequest { kit: &'a str },
    Passthrough { text: &'a str },
    Ignore,
}

/// ASCII 忽略大小写地去掉前缀
fn strip_prefix_ignore_case<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    let head = message.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        message.get(prefix.len()..)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ChatRouter {
    trigger_prefix: String,
    passthrough_prefix: String,
    admins: Vec<String>,
}

impl ChatRouter {
    pub fn new(
        trigger_prefix: impl Into<String>,
        passthrough_prefix: impl Into<String>,
        admins: Vec<String>,
    ) -> Self {
        Self {
            trigger_prefix: trigger_prefix.into(),
            passthrough_prefix: passthrough_prefix.into(),
            admins,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            cfg.workflow.trigger_prefix.clone(),
            cfg.admin.passthrough_prefix.clone(),
            cfg.admin.allow_list(),
        )
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.iter().any(|a| a == username)
    }

    pub fn classify<'a>(&self, username: &str, message: &'a str) -> ChatAction<'a> {
        if let Some(kit) = strip_prefix_ignore_case(message, &self.trigger_prefix) {
            return ChatAction::KitRequest { kit: kit.trim() };
        }
        if let Some(text) = strip_prefix_ignore_case(message, &self.passthrough_prefix) {
            let text = text.trim();
            if self.is_admin(username) && !text.is_empty() {
                return ChatAction::Passthrough { text };
            }
        }
        ChatAction::Ignore
    }

    /// 处理一条玩家聊天
    pub fn handle(
        &self,
        sequencer: &Sequencer,
        session: &dyn GameSession,
        log: &DiagnosticsLog,
        username: &str,
        message: &str,
    ) {
        match self.classify(username, message) {
            ChatAction::KitRequest { kit } => {
                // 拒绝已在 admit 内回复并记录
                let _ = sequencer.admit(username, kit);
            }
            ChatAction::Passthrough { text } => {
                if let Err(e) = session.chat(text) {
                    tracing::warn!("Passthrough from {} failed: {}", username, e);
                    return;
                }
                if text.starts_with('/') {
                    log.event(&format!(
                        "Admin {} executed command through bot: {}",
                        username, text
                    ));
                } else {
                    log.event(&format!("Admin {} spoke through bot: {}", username, text));
                }
            }
            ChatAction::Ignore => {}
        }
    }
}
