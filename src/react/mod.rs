//! 认知层：Planner（提示拼装与工具调用解析）、推理循环、进度事件

pub mod events;
pub mod loop_;
pub mod planner;

pub use events::{emit, progress_channel, ProgressCallback, ProgressEvent};
pub use loop_::{CompletionCriteria, CompletionGate, LoopOutcome, LoopRequest, ReasoningLoop};
pub use planner::{parse_model_turn, ModelTurn, Planner, ToolCall, ToolResult, ToolStatus};
