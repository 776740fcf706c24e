//! 工具注册表
//!
//! 工具名是封闭枚举 ToolName；每个工具实现 Tool trait（描述 + schemars 生成的参数 schema + 异步执行），
//! ToolRegistry 按 ToolName 注册与查找，分派是类型化查找而不是按字符串反射。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;

/// 系统中全部工具名（阶段工具 + 委派工具 + 终止工具）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    FetchSource,
    TranscribeAudio,
    CreateContentPlan,
    NarrateSegments,
    ValidateContent,
    GenerateVisuals,
    AnimateVisuals,
    PlanSfx,
    MixAudio,
    GenerateSubtitles,
    RenderExport,
    UploadToCloud,
    DelegateImport,
    DelegateContent,
    DelegateMedia,
    DelegateExport,
    Finish,
}

impl ToolName {
    pub const ALL: [ToolName; 17] = [
        ToolName::FetchSource,
        ToolName::TranscribeAudio,
        ToolName::CreateContentPlan,
        ToolName::NarrateSegments,
        ToolName::ValidateContent,
        ToolName::GenerateVisuals,
        ToolName::AnimateVisuals,
        ToolName::PlanSfx,
        ToolName::MixAudio,
        ToolName::GenerateSubtitles,
        ToolName::RenderExport,
        ToolName::UploadToCloud,
        ToolName::DelegateImport,
        ToolName::DelegateContent,
        ToolName::DelegateMedia,
        ToolName::DelegateExport,
        ToolName::Finish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::FetchSource => "fetch_source",
            ToolName::TranscribeAudio => "transcribe_audio",
            ToolName::CreateContentPlan => "create_content_plan",
            ToolName::NarrateSegments => "narrate_segments",
            ToolName::ValidateContent => "validate_content",
            ToolName::GenerateVisuals => "generate_visuals",
            ToolName::AnimateVisuals => "animate_visuals",
            ToolName::PlanSfx => "plan_sfx",
            ToolName::MixAudio => "mix_audio",
            ToolName::GenerateSubtitles => "generate_subtitles",
            ToolName::RenderExport => "render_export",
            ToolName::UploadToCloud => "upload_to_cloud",
            ToolName::DelegateImport => "delegate_import",
            ToolName::DelegateContent => "delegate_content",
            ToolName::DelegateMedia => "delegate_media",
            ToolName::DelegateExport => "delegate_export",
            ToolName::Finish => "finish",
        }
    }

    /// 依赖部署环境的工具（如仅服务端可用的云上传）；缺席时返回「环境不支持」而非「未知工具」
    pub fn is_environment_dependent(&self) -> bool {
        matches!(self, ToolName::UploadToCloud)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownToolName(pub String);

impl FromStr for ToolName {
    type Err = UnknownToolName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ToolName::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| UnknownToolName(s.to_string()))
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args / 结果均为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// 由参数类型生成 schema
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
}

/// 把 JSON 参数解析成类型化参数；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(tool: ToolName, args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(Default::default())
    } else {
        args
    };
    serde_json::from_value(args)
        .map_err(|e| ToolError::Failed(format!("invalid arguments for {tool}: {e}")))
}

/// 工具注册表：ToolName -> Arc<dyn Tool>，按枚举顺序迭代（即流水线的自然顺序）
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn get(&self, name: ToolName) -> Option<Arc<dyn Tool>> {
        self.tools.get(&name).cloned()
    }

    /// 参数 schema 中是否有 session_id
    pub fn accepts_session_id(&self, name: ToolName) -> bool {
        self.get(name).is_some_and(|tool| {
            tool.parameters_schema()
                .pointer("/properties/session_id")
                .is_some()
        })
    }

    pub fn contains(&self, name: ToolName) -> bool {
        self.tools.contains_key(&name)
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.tools.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn execute(&self, name: ToolName, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&name)
            .ok_or_else(|| ToolError::Failed(format!("tool not bound: {name}")))?;
        tool.execute(args).await
    }

    /// 仅保留 names 中列出的工具（未注册的名字忽略）
    pub fn subset(&self, names: &[ToolName]) -> ToolRegistry {
        ToolRegistry {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, tool)| (*name, tool.clone()))
                .collect(),
        }
    }

    /// 工具 schema JSON（拼入 system prompt）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name.as_str(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
