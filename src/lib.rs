//! Reel - 多阶段内容制作编排器
//!
//! 模块划分：
//! - **agents**: 阶段定义、阶段代理（Subagent）与制作总控（Supervisor）
//! - **cli**: 命令行参数（clap）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、恢复策略、进度聚合、Studio 装配
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **observability**: tracing 初始化
//! - **react**: Planner、推理循环、进度事件
//! - **session**: 制作会话模型与存储（内存 / SQLite）
//! - **tools**: 各阶段工具、注册表与执行器、生成式服务边界

pub mod agents;
pub mod cli;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod react;
pub mod session;
pub mod tools;

pub use crate::agents::{RunReport, Stage, Supervisor};
pub use crate::core::{AgentError, StudioBuilder};
