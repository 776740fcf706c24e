//! finish：结构化完成信号
//!
//! 模型调用 finish 声明阶段完成，推理循环据此（而不是回复文本中的关键词）判断是否终止。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::registry::{parse_args, schema_of};
use crate::tools::{Tool, ToolName};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinishArgs {
    /// 本阶段完成情况的简短总结
    #[serde(default)]
    pub summary: String,
    /// 已完成的产物标记，如 transcript、narration、visuals、export
    #[serde(default)]
    pub markers: Vec<String>,
    /// 本阶段使用（或创建）的会话 ID
    #[serde(default)]
    pub session_id: Option<String>,
}

pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> ToolName {
        ToolName::Finish
    }

    fn description(&self) -> &str {
        "Declare the task complete. List the completion markers you achieved and the session_id you worked on."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FinishArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FinishArgs = parse_args(self.name(), args)?;
        Ok(json!({
            "complete": true,
            "summary": args.summary,
            "markers": args.markers,
            "session_id": args.session_id,
        }))
    }
}
