//! Kitbot - 单角色 kit 发放机器人
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求队列、单飞工作流状态机、延迟清理、错误与关闭
//! - **kits**: kit 目录（标识 → 按钮坐标）
//! - **session**: 外部协作者接口、WebSocket 桥接、聊天路由、重连监管
//! - **console**: 运维控制台（say / cmd / status / help / exit）
//! - **observability**: tracing 初始化与诊断日志文件

pub mod config;
pub mod console;
pub mod core;
pub mod kits;
pub mod observability;
pub mod session;
