//! 核心层：错误类型、恢复策略、进度聚合与 Studio 装配

pub mod builder;
pub mod error;
pub mod progress;
pub mod recovery;

pub use builder::{create_llm_from_config, open_store, studio_builder, Studio, StudioBuilder};
pub use error::{AgentError, ToolError};
pub use progress::{band, overall_progress, StageBand};
pub use recovery::{FallbackAction, RecoveryEngine, RecoveryPolicy, RecoveryTable};
