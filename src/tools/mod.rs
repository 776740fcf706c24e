//! 工具层：类型化注册表、执行器、各阶段工具与生成式服务边界

pub mod content;
pub mod executor;
pub mod export;
pub mod finish;
pub mod import;
pub mod media;
pub mod mock;
pub mod registry;
pub mod services;
pub mod studio;

pub use executor::{ToolExecutor, ToolLookup};
pub use finish::{FinishArgs, FinishTool};
pub use mock::MockStudioServices;
pub use registry::{parse_args, schema_of, Tool, ToolName, ToolRegistry, UnknownToolName};
pub use services::{PlanRequest, SourceInfo, StudioServices};
pub use studio::StudioToolbox;
