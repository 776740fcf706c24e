//! 错误类型
//!
//! AgentError 覆盖推理循环、阶段与整条流水线的失败；is_retryable 供恢复策略区分瞬时错误与致命错误。
//! ToolError 是工具执行的结果错误：Failed 回填给模型继续推理，Abort 终止当前循环。

use thiserror::Error;

use crate::agents::{CompletedStage, Stage};
use crate::session::{SessionId, StoreError};

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    /// 非首阶段缺少会话 ID：立即致命，不重试
    #[error("{0} stage requires a session id but none was supplied")]
    MissingSession(Stage),

    #[error("{agent} exceeded its iteration budget ({max_iterations}) without completing")]
    IterationBudgetExceeded { agent: String, max_iterations: usize },

    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: Stage, reason: String },

    /// 工具返回 ToolError::Abort，循环随即终止
    #[error("Tool {tool} aborted the loop: {reason}")]
    ToolAborted { tool: String, reason: String },

    /// 不可降级阶段耗尽重试，整条流水线中止（不返回任何部分产物）
    #[error("Production aborted at {stage} stage: {reason}")]
    RunAborted {
        stage: Stage,
        reason: String,
        completed_stages: Vec<CompletedStage>,
    },

    /// Supervisor 自身未能完成（迭代用尽、取消、LLM 失败），附带已完成的阶段
    #[error("Production stopped after {} completed stage(s): {source}", .completed_stages.len())]
    RunStopped {
        #[source]
        source: Box<AgentError>,
        completed_stages: Vec<CompletedStage>,
    },

    /// 循环失败时已经通过工具结果得到了会话 ID（创建会话的阶段重试时沿用它）
    #[error("{source} (session {session_id} was created before the failure)")]
    FailedWithSession {
        session_id: SessionId,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl AgentError {
    /// 恢复策略是否可以重试该错误
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::FailedWithSession { source, .. } => source.is_retryable(),
            AgentError::MissingSession(_)
            | AgentError::Cancelled
            | AgentError::RunAborted { .. }
            | AgentError::RunStopped { .. }
            | AgentError::ConfigError(_) => false,
            _ => true,
        }
    }

    /// 拆出失败前已创建的会话 ID
    pub fn split_session(self) -> (AgentError, Option<SessionId>) {
        match self {
            AgentError::FailedWithSession { session_id, source } => (*source, Some(session_id)),
            other => (other, None),
        }
    }

    /// 运行级错误中已完成的阶段
    pub fn completed_stages(&self) -> &[CompletedStage] {
        match self {
            AgentError::RunAborted {
                completed_stages, ..
            }
            | AgentError::RunStopped {
                completed_stages, ..
            } => completed_stages,
            _ => &[],
        }
    }
}

/// 工具执行错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// 普通失败：作为结构化错误结果回填给模型，模型可换参数重试
    #[error("{0}")]
    Failed(String),

    /// 致命失败：终止所在的推理循环
    #[error("aborted: {0}")]
    Abort(String),
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Failed(msg.into())
    }
}

impl From<StoreError> for ToolError {
    fn from(e: StoreError) -> Self {
        ToolError::Failed(format!("session store: {e}"))
    }
}
