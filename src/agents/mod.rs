//! 代理层：阶段定义、Subagent（阶段代理）与 Supervisor（制作总控）

pub mod stages;
pub mod subagent;
pub mod supervisor;
pub mod types;

pub use stages::Stage;
pub use subagent::{build_stage_message, StageSubagent, Subagent};
pub use supervisor::{DelegateArgs, Supervisor, PRODUCTION_COMPLETE};
pub use types::{
    AppliedFallback, CompletedStage, RunReport, SubagentContext, SubagentResult, UserPreferences,
};
