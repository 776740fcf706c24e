//! Subagent：一个阶段 = 绑定该阶段工具子集的推理循环
//!
//! invoke 负责前置检查（非内容阶段必须带会话 ID）、改写指令（原样重述会话 ID、禁止占位 ID）、
//! 把循环的阶段内进度换算成整体进度，并把循环结果整理成 SubagentResult。
//! Subagent 本身从不读写会话存储，只有它的工具会。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agents::types::{CompletedStage, SubagentContext, SubagentResult};
use crate::agents::Stage;
use crate::core::progress::overall_progress;
use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::react::planner::{SESSION_ID_PREFIX, TRANSCRIPT_PREFIX};
use crate::react::{
    emit, CompletionCriteria, LoopRequest, ProgressCallback, ProgressEvent, ReasoningLoop,
};
use crate::tools::{StudioToolbox, ToolExecutor, ToolName, ToolRegistry};

/// 模型常常照抄的占位会话 ID（长的在前，避免部分替换）
const PLACEHOLDER_IDS: &[&str] = &[
    "YOUR_SESSION_ID",
    "<session_id>",
    "{session_id}",
    "SESSION_ID",
    "session_123",
    "prod_xxx",
];

#[async_trait]
pub trait Subagent: Send + Sync {
    fn stage(&self) -> Stage;

    async fn invoke(&self, context: SubagentContext) -> Result<SubagentResult, AgentError>;
}

/// 标准阶段代理
pub struct StageSubagent {
    stage: Stage,
    engine: ReasoningLoop,
    max_iterations: usize,
    cancel: Option<CancellationToken>,
}

impl StageSubagent {
    pub fn new(
        stage: Stage,
        llm: Arc<dyn LlmClient>,
        tools: ToolRegistry,
        tool_timeout_secs: u64,
        max_iterations: usize,
    ) -> Self {
        Self {
            stage,
            engine: ReasoningLoop::new(llm, ToolExecutor::new(tools, tool_timeout_secs)),
            max_iterations,
            cancel: None,
        }
    }

    /// 用工具箱中该阶段可用的工具构建
    pub fn for_stage(
        stage: Stage,
        llm: Arc<dyn LlmClient>,
        toolbox: &StudioToolbox,
        tool_timeout_secs: u64,
        max_iterations: usize,
    ) -> Self {
        Self::new(
            stage,
            llm,
            toolbox.registry_for(stage.tools()),
            tool_timeout_secs,
            max_iterations,
        )
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn stage_progress(&self, progress: Option<ProgressCallback>) -> Option<ProgressCallback> {
        let stage = self.stage;
        progress.map(|inner| {
            let wrapped: ProgressCallback = Arc::new(move |mut ev: ProgressEvent| {
                ev.overall_percent = ev
                    .stage_percent
                    .map(|p| overall_progress(stage, f64::from(p)));
                inner(ev)
            });
            wrapped
        })
    }
}

/// 把占位 ID 换成真实 ID
fn replace_placeholders(text: &str, session_id: &str) -> String {
    PLACEHOLDER_IDS
        .iter()
        .fold(text.to_string(), |acc, p| acc.replace(p, session_id))
}

/// 组装发给阶段循环的首条消息
pub fn build_stage_message(stage: Stage, context: &SubagentContext) -> String {
    let mut parts = Vec::new();
    match &context.session_id {
        Some(id) => {
            parts.push(replace_placeholders(context.instruction.trim(), id));
            parts.push(format!(
                "{SESSION_ID_PREFIX} {id}\nUse this session_id exactly as written in every tool call and in finish. Never invent, shorten or replace it."
            ));
            if stage.creates_session() {
                parts.push(
                    "This session was created by an earlier attempt. Call create_content_plan with this session_id to rebuild its plan; do not create another session."
                        .to_string(),
                );
            }
        }
        None => {
            parts.push(context.instruction.trim().to_string());
            if stage.creates_session() {
                parts.push(
                    "No session exists yet. create_content_plan creates it and returns its session_id; use that exact value afterwards and never invent one."
                        .to_string(),
                );
            }
        }
    }
    if let Some(transcript) = context.transcript.as_deref().filter(|t| !t.trim().is_empty()) {
        let flat = transcript.split_whitespace().collect::<Vec<_>>().join(" ");
        parts.push(format!(
            "{TRANSCRIPT_PREFIX} {flat}\nPass this transcript to create_content_plan as transcript."
        ));
    }
    if let Some(prefs) = context.preferences.render() {
        parts.push(prefs);
    }
    if !context.completed_stages.is_empty() {
        let done: Vec<String> = context
            .completed_stages
            .iter()
            .map(|c| {
                format!(
                    "{} ({})",
                    c.stage.name(),
                    if c.success { "ok" } else { "degraded" }
                )
            })
            .collect();
        parts.push(format!("Completed stages: {}", done.join(", ")));
    }
    parts.join("\n\n")
}

#[async_trait]
impl Subagent for StageSubagent {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn invoke(&self, context: SubagentContext) -> Result<SubagentResult, AgentError> {
        let start = Instant::now();
        let stage = self.stage;
        if stage.requires_session() && context.session_id.is_none() {
            return Err(AgentError::MissingSession(stage));
        }

        tracing::info!(
            stage = stage.name(),
            session_id = context.session_id.as_deref().unwrap_or("-"),
            "stage started"
        );

        let progress = self.stage_progress(context.progress.clone());
        emit(
            progress.as_ref(),
            ProgressEvent {
                stage: stage.name().to_string(),
                tool: None,
                message: format!("{stage} stage started"),
                is_complete: false,
                success: None,
                stage_percent: Some(0),
                overall_percent: None,
            },
        );

        let markers = stage.completion_markers().iter().copied();
        let request = LoopRequest::new(
            stage.name(),
            stage.system_prompt(),
            build_stage_message(stage, &context),
            self.max_iterations,
            CompletionCriteria::new(markers, stage != Stage::Import),
        )
        .with_session(context.session_id.clone())
        .with_progress(progress.clone())
        .with_cancel(self.cancel.clone());

        let outcome = match self.engine.run(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                emit(
                    progress.as_ref(),
                    ProgressEvent {
                        stage: stage.name().to_string(),
                        tool: None,
                        message: format!("{stage} stage failed: {e}"),
                        is_complete: true,
                        success: Some(false),
                        stage_percent: None,
                        overall_percent: None,
                    },
                );
                tracing::warn!(stage = stage.name(), error = %e, "stage loop failed");
                return Err(e);
            }
        };

        let transcript = outcome
            .output_of(ToolName::TranscribeAudio)
            .and_then(|o| o.get("transcript"))
            .and_then(|t| t.as_str())
            .map(String::from);

        let session_id = context.session_id.clone().or(outcome.session_id);
        if stage.creates_session() && session_id.is_none() {
            return Err(AgentError::StageFailed {
                stage,
                reason: "no session id was produced".to_string(),
            });
        }

        let duration = start.elapsed();
        emit(
            progress.as_ref(),
            ProgressEvent {
                stage: stage.name().to_string(),
                tool: None,
                message: format!("{stage} stage complete"),
                is_complete: true,
                success: Some(true),
                stage_percent: Some(100),
                overall_percent: None,
            },
        );
        tracing::info!(
            stage = stage.name(),
            iterations = outcome.iterations,
            duration_ms = duration.as_millis() as u64,
            "stage finished"
        );

        Ok(SubagentResult {
            success: true,
            session_id,
            completed_stage: CompletedStage::now(stage, duration, true),
            errors: Vec::new(),
            duration,
            message: outcome.final_message,
            fallback_applied: false,
            transcript,
        })
    }
}
