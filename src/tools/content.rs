//! 内容阶段工具：创建文案规划（即创建会话）、逐场景配音、校验
//!
//! create_content_plan 是整个系统里唯一分配会话 ID 的地方。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::session::{new_session_id, Session, SessionStore};
use crate::tools::registry::{parse_args, schema_of};
use crate::tools::services::{PlanRequest, StudioServices};
use crate::tools::studio::load_session;
use crate::tools::{Tool, ToolName};

fn default_scene_count() -> usize {
    3
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateContentPlanArgs {
    /// 制作主题
    pub topic: String,
    /// 导入阶段得到的转写文本（可选）
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default = "default_scene_count")]
    pub scene_count: usize,
    #[serde(default)]
    pub style: Option<String>,
    /// 已存在的会话：重建它的规划而不是新建会话
    #[serde(default)]
    pub session_id: Option<String>,
}

pub struct CreateContentPlanTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl CreateContentPlanTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for CreateContentPlanTool {
    fn name(&self) -> ToolName {
        ToolName::CreateContentPlan
    }

    fn description(&self) -> &str {
        "Create the scene-by-scene content plan for a topic. Creates the production session and returns its session_id; every later tool needs that exact id. If a session_id is given, that session's plan is rebuilt instead."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<CreateContentPlanArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: CreateContentPlanArgs = parse_args(self.name(), args)?;
        let topic = args.topic.trim();
        if topic.is_empty() {
            return Err(ToolError::failed("topic must not be empty"));
        }
        if args.scene_count == 0 || args.scene_count > 20 {
            return Err(ToolError::failed("scene_count must be between 1 and 20"));
        }

        let existing = match &args.session_id {
            Some(id) => Some(load_session(&self.store, id).await?),
            None => None,
        };

        let request = PlanRequest {
            topic: topic.to_string(),
            transcript: args.transcript.clone(),
            scene_count: args.scene_count,
            style: args.style,
        };
        let plan = self
            .services
            .plan_content(&request)
            .await
            .map_err(ToolError::Failed)?;

        // 重建时整份替换，旧的配音与画面随之清空
        let mut session = match &existing {
            Some(old) => {
                let mut s = Session::new(old.id.clone(), topic);
                s.created_at = old.created_at;
                s
            }
            None => Session::new(new_session_id(), topic),
        };
        let session_id = session.id.clone();
        session.transcript = args.transcript;
        session.content_plan = Some(plan.clone());
        session.touch(self.name().as_str());
        self.store.set(session).await?;
        tracing::info!(session_id = %session_id, scenes = plan.scenes.len(), "content plan stored");

        Ok(json!({
            "session_id": session_id,
            "title": plan.title,
            "scene_count": plan.scenes.len(),
            "scenes": plan
                .scenes
                .iter()
                .map(|s| json!({ "index": s.index, "heading": s.heading }))
                .collect::<Vec<_>>(),
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NarrateSegmentsArgs {
    pub session_id: String,
    #[serde(default)]
    pub voice: Option<String>,
}

pub struct NarrateSegmentsTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl NarrateSegmentsTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for NarrateSegmentsTool {
    fn name(&self) -> ToolName {
        ToolName::NarrateSegments
    }

    fn description(&self) -> &str {
        "Generate narration audio for every scene of the session's content plan."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<NarrateSegmentsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: NarrateSegmentsArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        if session.scenes().is_empty() {
            return Err(ToolError::failed(
                "session has no content plan yet: call create_content_plan first",
            ));
        }

        let mut segments = Vec::with_capacity(session.scenes().len());
        for scene in session.scenes() {
            let segment = self
                .services
                .narrate(scene, args.voice.as_deref())
                .await
                .map_err(|e| ToolError::Failed(format!("scene {}: {e}", scene.index)))?;
            segments.push(segment);
        }
        let total: f32 = segments.iter().map(|s| s.duration_secs).sum();
        let count = segments.len();

        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    s.narration = segments;
                    s.touch(step);
                }),
            )
            .await?;

        Ok(json!({
            "session_id": args.session_id,
            "segments": count,
            "total_duration_secs": total,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ValidateContentArgs {
    pub session_id: String,
}

pub struct ValidateContentTool {
    store: Arc<dyn SessionStore>,
}

impl ValidateContentTool {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }
}

/// 检查会话内容是否可以进入媒体阶段
pub fn content_issues(session: &Session) -> Vec<String> {
    let mut issues = Vec::new();
    let Some(plan) = &session.content_plan else {
        issues.push("content plan missing".to_string());
        return issues;
    };
    if plan.scenes.is_empty() {
        issues.push("content plan has no scenes".to_string());
    }
    for scene in &plan.scenes {
        if scene.script.trim().is_empty() {
            issues.push(format!("scene {} has an empty script", scene.index));
        }
    }
    if session.narration.is_empty() {
        issues.push("narration missing".to_string());
    } else if session.narration.len() != plan.scenes.len() {
        issues.push(format!(
            "narration covers {} of {} scenes",
            session.narration.len(),
            plan.scenes.len()
        ));
    }
    issues
}

#[async_trait]
impl Tool for ValidateContentTool {
    fn name(&self) -> ToolName {
        ToolName::ValidateContent
    }

    fn description(&self) -> &str {
        "Check that the session's content plan and narration are complete. Returns valid plus a list of issues."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ValidateContentArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: ValidateContentArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        let issues = content_issues(&session);
        Ok(json!({
            "session_id": args.session_id,
            "valid": issues.is_empty(),
            "issues": issues,
        }))
    }
}
