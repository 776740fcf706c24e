//! Planner：拼装 system prompt、调用 LLM 并解析工具调用
//!
//! 模型以 JSON 文本发出工具调用，支持单个 `{"tool": ..., "args": ...}`
//! 或批量 `{"tool_calls": [{"id": ..., "tool": ..., "args": ...}, ...]}`；
//! 可以包在 ```json 代码块里。没有 JSON 的回复视为纯文本。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::tools::ToolRegistry;

/// system prompt 中列出可用工具的行前缀
pub const AVAILABLE_TOOLS_PREFIX: &str = "Available tools:";
/// system prompt 中列出完成标记的行前缀
pub const COMPLETION_MARKERS_PREFIX: &str = "Completion markers:";
/// 阶段指令中声明会话 ID 的行前缀
pub const SESSION_ID_PREFIX: &str = "Session id:";
/// 阶段首条消息中携带导入转写的行
pub const TRANSCRIPT_PREFIX: &str = "Transcript:";
/// 工具结果消息的前缀（后接 JSON 数组）
pub const TOOL_RESULTS_PREFIX: &str = "Tool results:";

const PROTOCOL: &str = r#"Respond with JSON only. To call one tool:
{"tool": "<name>", "args": {...}}
To call several tools in one turn:
{"tool_calls": [{"id": "c1", "tool": "<name>", "args": {...}}, ...]}
Each tool runs at most once per task. When the work is done, call "finish" with the completion markers you achieved and the session_id you used. Never invent a session_id."#;

/// 单个工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub tool: String,
    pub args: Value,
}

/// 回填给模型的调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Ok,
    /// 同一循环内该工具已执行过
    Skipped,
    /// 已知工具，但当前阶段或部署环境不可用
    Unavailable,
    /// 不存在的工具名
    Unknown,
    Error,
    /// 参数中的 session_id 与本阶段的会话不一致，未执行
    Rejected,
}

/// 工具调用结果，按调用 ID 与原调用一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    pub status: ToolStatus,
    pub output: Value,
}

impl ToolResult {
    pub fn new(call: &ToolCall, status: ToolStatus, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            status,
            output,
        }
    }

    pub fn notice(call: &ToolCall, status: ToolStatus, message: impl Into<String>) -> Self {
        Self::new(call, status, serde_json::json!({ "message": message.into() }))
    }
}

/// 一轮模型输出
#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Calls(Vec<ToolCall>),
    Text(String),
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct RawBatch {
    tool_calls: Vec<RawCall>,
}

fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 解析模型输出；缺失的调用 ID 生成为 call_{iteration}_{n}
pub fn parse_model_turn(output: &str, iteration: usize) -> Result<ModelTurn, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(ModelTurn::Text(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    let raw: Vec<RawCall> = if value.get("tool_calls").is_some() {
        serde_json::from_value::<RawBatch>(value)
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?
            .tool_calls
    } else {
        vec![serde_json::from_value::<RawCall>(value)
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?]
    };

    let calls: Vec<ToolCall> = raw
        .into_iter()
        .filter(|c| !c.tool.trim().is_empty())
        .enumerate()
        .map(|(n, c)| ToolCall {
            id: c
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("call_{}_{}", iteration, n + 1)),
            tool: c.tool.trim().to_string(),
            args: c.args,
        })
        .collect();

    if calls.is_empty() {
        Ok(ModelTurn::Text(trimmed.to_string()))
    } else {
        Ok(ModelTurn::Calls(calls))
    }
}

/// 组装一个循环的 system prompt：基础提示 + 可用工具行 + 完成标记行 + schema + 协议说明
pub fn compose_system_prompt(base: &str, tools: &ToolRegistry, markers: &[String]) -> String {
    let names: Vec<&str> = tools.tool_names().iter().map(|n| n.as_str()).collect();
    format!(
        "{base}\n\n{AVAILABLE_TOOLS_PREFIX} {}\n{COMPLETION_MARKERS_PREFIX} {}\n\nTool schemas:\n{}\n\n{PROTOCOL}",
        names.join(", "),
        markers.join(", "),
        tools.to_schema_json(),
    )
}

/// 结果消息：前缀 + JSON 数组
pub fn tool_results_message(results: &[ToolResult]) -> Message {
    let body = serde_json::to_string(results).unwrap_or_else(|_| "[]".to_string());
    Message::user(format!("{TOOL_RESULTS_PREFIX}\n{body}"))
}

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// 底层 LLM 的累计用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(Message::system(self.system_prompt.clone()));
        full.extend_from_slice(messages);
        self.llm.complete(&full).await.map_err(AgentError::LlmError)
    }
}
