//! Supervisor：以四个委派工具为工具集的推理循环
//!
//! 每个委派工具把一次阶段执行交给 RecoveryEngine::execute_subagent，并维护本次运行的共享状态：
//! 内容阶段给出的会话 ID（只认第一个）、按顺序追加的已完成阶段、已应用的降级。
//! 媒体与导出阶段的委派必须携带与持有 ID 一致的 session_id。
//! 不可降级阶段耗尽重试时，委派工具以 Abort 终止循环，run 返回 RunAborted；
//! 其余失败（迭代用尽、取消、LLM 错误）以 RunStopped 返回，两者都带着已完成的阶段。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agents::types::{AppliedFallback, CompletedStage, RunReport, SubagentContext, UserPreferences};
use crate::agents::{Stage, Subagent};
use crate::core::{AgentError, RecoveryEngine, ToolError};
use crate::llm::LlmClient;
use crate::react::{CompletionCriteria, LoopRequest, ProgressCallback, ReasoningLoop};
use crate::session::SessionId;
use crate::tools::{parse_args, schema_of, Tool, ToolExecutor, ToolName, ToolRegistry};

pub const PRODUCTION_COMPLETE: &str = "production_complete";

const SUPERVISOR_PROMPT: &str = "You are the production supervisor of a video studio. You do not create content yourself; you delegate each stage to a specialist:
1. delegate_import (optional, only when the user gives a source URL to import)
2. delegate_content (creates the production session and returns its session_id)
3. delegate_media (needs that session_id)
4. delegate_export (needs that session_id)
Run the stages in this order. Pass the session_id returned by delegate_content verbatim to every later delegation. A stage result with success=false and fallback_applied=true is degraded but usable: continue with the next stage.
When delegate_export has completed, call finish with the marker production_complete and the session_id.";

/// 本次运行的共享状态
#[derive(Debug, Default)]
struct RunState {
    session_id: Option<SessionId>,
    completed: Vec<CompletedStage>,
    fallbacks: Vec<AppliedFallback>,
    /// 导入阶段的转写，交给内容阶段
    transcript: Option<String>,
    aborted: Option<AgentError>,
}

type SharedState = Arc<Mutex<RunState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DelegateArgs {
    /// 交给该阶段的任务说明
    #[serde(default)]
    pub instruction: String,
    /// delegate_content 返回的会话 ID（媒体与导出阶段必填）
    #[serde(default)]
    pub session_id: Option<String>,
    /// delegate_import 返回的转写（仅 delegate_content 使用；不填则沿用导入结果）
    #[serde(default)]
    pub transcript: Option<String>,
}

struct DelegateTool {
    stage: Stage,
    subagent: Arc<dyn Subagent>,
    recovery: Arc<RecoveryEngine>,
    state: SharedState,
    preferences: UserPreferences,
    progress: Option<ProgressCallback>,
}

impl DelegateTool {
    /// 决定交给阶段的会话 ID；Err 回填给模型
    fn session_for_stage(&self, given: Option<String>) -> Result<Option<SessionId>, ToolError> {
        let held = lock(&self.state).session_id.clone();
        if !self.stage.requires_session() {
            return Ok(held);
        }
        match (held, given) {
            (None, _) => Err(ToolError::failed(
                "no production session exists yet: delegate_content must succeed first",
            )),
            (Some(held), Some(given)) if held == given => Ok(Some(held)),
            (Some(held), Some(given)) => Err(ToolError::Failed(format!(
                "session_id '{given}' is not this production's session; use '{held}'"
            ))),
            (Some(held), None) => Err(ToolError::Failed(format!(
                "{} requires session_id; use '{held}'",
                self.stage.delegate_tool()
            ))),
        }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> ToolName {
        self.stage.delegate_tool()
    }

    fn description(&self) -> &str {
        match self.stage {
            Stage::Import => "Delegate importing a source URL (fetch + transcribe) to the import agent.",
            Stage::Content => "Delegate content planning and narration to the content agent. Returns the production session_id.",
            Stage::Media => "Delegate visuals, animation and sound-effect planning to the media agent. Requires session_id.",
            Stage::Export => "Delegate audio mix, subtitles, rendering and upload to the export agent. Requires session_id.",
        }
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<DelegateArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: DelegateArgs = parse_args(self.name(), args)?;
        let session_id = self.session_for_stage(args.session_id)?;
        let (completed_stages, transcript) = {
            let state = lock(&self.state);
            let transcript = match self.stage {
                Stage::Content => args.transcript.or_else(|| state.transcript.clone()),
                _ => None,
            };
            (state.completed.clone(), transcript)
        };

        let context = SubagentContext {
            session_id,
            instruction: args.instruction,
            completed_stages,
            preferences: self.preferences.clone(),
            transcript,
            progress: self.progress.clone(),
        };

        match self
            .recovery
            .execute_subagent(self.subagent.as_ref(), context)
            .await
        {
            Ok(result) => {
                let mut state = lock(&self.state);
                if self.stage.creates_session() && state.session_id.is_none() {
                    state.session_id = result.session_id.clone();
                }
                if result.transcript.is_some() {
                    state.transcript = result.transcript.clone();
                }
                state.completed.push(result.completed_stage.clone());
                if result.fallback_applied {
                    state.fallbacks.push(AppliedFallback {
                        stage: self.stage,
                        message: result.message.clone(),
                    });
                }
                Ok(json!({
                    "stage": self.stage.name(),
                    "success": result.success,
                    "session_id": result.session_id,
                    "fallback_applied": result.fallback_applied,
                    "message": result.message,
                    "errors": result.errors,
                    "transcript": result.transcript,
                }))
            }
            Err(e) => {
                let reason = e.to_string();
                let mut state = lock(&self.state);
                let completed_stages = state.completed.clone();
                let aborted = match e {
                    AgentError::Cancelled => AgentError::RunStopped {
                        source: Box::new(AgentError::Cancelled),
                        completed_stages,
                    },
                    _ => AgentError::RunAborted {
                        stage: self.stage,
                        reason: reason.clone(),
                        completed_stages,
                    },
                };
                state.aborted = Some(aborted);
                Err(ToolError::Abort(reason))
            }
        }
    }
}

/// 制作总控
pub struct Supervisor {
    llm: Arc<dyn LlmClient>,
    recovery: Arc<RecoveryEngine>,
    subagents: BTreeMap<Stage, Arc<dyn Subagent>>,
    max_iterations: usize,
    preferences: UserPreferences,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl Supervisor {
    pub fn new(llm: Arc<dyn LlmClient>, recovery: Arc<RecoveryEngine>) -> Self {
        Self {
            llm,
            recovery,
            subagents: BTreeMap::new(),
            max_iterations: 12,
            preferences: UserPreferences::default(),
            progress: None,
            cancel: None,
        }
    }

    /// 注册某阶段的代理（同一阶段后注册的覆盖先注册的）
    pub fn with_subagent(mut self, subagent: Arc<dyn Subagent>) -> Self {
        self.subagents.insert(subagent.stage(), subagent);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_preferences(mut self, preferences: UserPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.subagents.keys().copied().collect()
    }

    /// 运行一次完整制作
    pub async fn run(&self, request: &str) -> Result<RunReport, AgentError> {
        let start = Instant::now();
        let state: SharedState = Arc::new(Mutex::new(RunState::default()));

        let mut tools = ToolRegistry::new();
        for (stage, subagent) in &self.subagents {
            tools.register(DelegateTool {
                stage: *stage,
                subagent: subagent.clone(),
                recovery: self.recovery.clone(),
                state: state.clone(),
                preferences: self.preferences.clone(),
                progress: self.progress.clone(),
            });
        }

        let gate_state = state.clone();
        let criteria = CompletionCriteria::new([PRODUCTION_COMPLETE], true).with_gate(Arc::new(
            move || {
                if lock(&gate_state)
                    .completed
                    .iter()
                    .any(|c| c.stage == Stage::Export)
                {
                    Ok(())
                } else {
                    Err("delegate_export has not completed yet".to_string())
                }
            },
        ));

        let mut message = request.trim().to_string();
        if let Some(prefs) = self.preferences.render() {
            message = format!("{message}\n\n{prefs}");
        }

        tracing::info!(request = %request.trim(), stages = self.subagents.len(), "production started");
        let engine = ReasoningLoop::new(self.llm.clone(), ToolExecutor::without_timeout(tools));
        let loop_request = LoopRequest::new(
            "supervisor",
            SUPERVISOR_PROMPT,
            message,
            self.max_iterations,
            criteria,
        )
        .with_progress(self.progress.clone())
        .with_cancel(self.cancel.clone());

        let outcome = engine.run(loop_request).await;
        let mut state = lock(&state);
        match outcome {
            Ok(outcome) => {
                let report = RunReport {
                    success: outcome.success,
                    session_id: state.session_id.clone().or(outcome.session_id),
                    completed_stages: std::mem::take(&mut state.completed),
                    fallbacks: std::mem::take(&mut state.fallbacks),
                    message: outcome.final_message,
                    duration: start.elapsed(),
                };
                tracing::info!(
                    session_id = report.session_id.as_deref().unwrap_or("-"),
                    stages = report.completed_stages.len(),
                    degraded = report.degraded(),
                    "production finished"
                );
                Ok(report)
            }
            Err(e) => {
                let err = match state.aborted.take() {
                    Some(aborted) => aborted,
                    None => AgentError::RunStopped {
                        source: Box::new(e.split_session().0),
                        completed_stages: std::mem::take(&mut state.completed),
                    },
                };
                tracing::error!(
                    error = %err,
                    completed = err.completed_stages().len(),
                    "production failed"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::SubagentResult;
    use crate::llm::ScriptedLlmClient;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// 桩代理：前 fail_times 次失败，记录每次收到的会话 ID
    struct StubAgent {
        stage: Stage,
        fail_times: u32,
        creates: Option<&'static str>,
        cancel_on_call: bool,
        calls: AtomicU32,
        seen: Mutex<Vec<Option<String>>>,
        transcripts: Mutex<Vec<Option<String>>>,
    }

    impl StubAgent {
        fn new(stage: Stage) -> Arc<Self> {
            Self::failing(stage, 0)
        }

        fn failing(stage: Stage, fail_times: u32) -> Arc<Self> {
            Arc::new(Self {
                stage,
                fail_times,
                creates: (stage == Stage::Content).then_some("prod_1"),
                cancel_on_call: false,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
                transcripts: Mutex::new(Vec::new()),
            })
        }

        fn cancelling(stage: Stage) -> Arc<Self> {
            Arc::new(Self {
                stage,
                fail_times: 0,
                creates: None,
                cancel_on_call: true,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
                transcripts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }

        fn transcripts(&self) -> Vec<Option<String>> {
            self.transcripts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Subagent for StubAgent {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn invoke(&self, context: SubagentContext) -> Result<SubagentResult, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(context.session_id.clone());
            self.transcripts.lock().unwrap().push(context.transcript.clone());
            if self.cancel_on_call {
                return Err(AgentError::Cancelled);
            }
            if n <= self.fail_times {
                return Err(AgentError::StageFailed {
                    stage: self.stage,
                    reason: "backend down".into(),
                });
            }
            Ok(SubagentResult {
                success: true,
                session_id: context.session_id.or(self.creates.map(String::from)),
                completed_stage: CompletedStage::now(self.stage, Duration::ZERO, true),
                errors: vec![],
                duration: Duration::ZERO,
                message: format!("{} done", self.stage.name()),
                fallback_applied: false,
                transcript: (self.stage == Stage::Import).then(|| "imported words".to_string()),
            })
        }
    }

    fn delegate(tool: &str, session_id: Option<&str>) -> String {
        json!({ "tool": tool, "args": { "instruction": "go", "session_id": session_id } }).to_string()
    }

    fn finish(session_id: &str) -> String {
        json!({ "tool": "finish", "args": {
            "summary": "video ready", "markers": ["production_complete"], "session_id": session_id
        } })
        .to_string()
    }

    fn supervisor(
        llm: Arc<ScriptedLlmClient>,
        agents: &[Arc<StubAgent>],
    ) -> Supervisor {
        let mut sup = Supervisor::new(llm, Arc::new(RecoveryEngine::default()));
        for a in agents {
            sup = sup.with_subagent(a.clone());
        }
        sup
    }

    #[tokio::test]
    async fn test_later_stages_receive_surfaced_session() {
        let content = StubAgent::new(Stage::Content);
        let media = StubAgent::new(Stage::Media);
        let export = StubAgent::new(Stage::Export);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            delegate("delegate_media", Some("prod_1")),
            delegate("delegate_export", Some("prod_1")),
            finish("prod_1"),
        ]));
        let sup = supervisor(llm, &[content.clone(), media.clone(), export.clone()]);

        let report = sup.run("Make a video about tides").await.unwrap();
        assert!(report.success);
        assert!(!report.degraded());
        assert_eq!(report.session_id.as_deref(), Some("prod_1"));
        let stages: Vec<Stage> = report.completed_stages.iter().map(|c| c.stage).collect();
        assert_eq!(stages, vec![Stage::Content, Stage::Media, Stage::Export]);
        assert_eq!(content.seen(), vec![None]);
        assert_eq!(media.seen(), vec![Some("prod_1".to_string())]);
        assert_eq!(export.seen(), vec![Some("prod_1".to_string())]);
    }

    #[tokio::test]
    async fn test_media_before_content_is_refused() {
        let content = StubAgent::new(Stage::Content);
        let media = StubAgent::new(Stage::Media);
        let export = StubAgent::new(Stage::Export);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_media", Some("prod_x")),
            delegate("delegate_content", None),
            delegate("delegate_media", Some("prod_1")),
            delegate("delegate_export", Some("prod_1")),
            finish("prod_1"),
        ]));
        let sup = supervisor(llm.clone(), &[content, media.clone(), export]);

        let report = sup.run("Make a video").await.unwrap();
        assert_eq!(report.completed_stages.len(), 3);
        assert_eq!(media.calls(), 1);
        let second_request = &llm.requests()[1];
        let feedback = &second_request.last().unwrap().content;
        assert!(feedback.contains("delegate_content must succeed first"));
    }

    #[tokio::test]
    async fn test_finish_before_export_is_rejected() {
        let content = StubAgent::new(Stage::Content);
        let media = StubAgent::new(Stage::Media);
        let export = StubAgent::new(Stage::Export);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            finish("prod_1"),
            delegate("delegate_media", Some("prod_1")),
            delegate("delegate_export", Some("prod_1")),
            finish("prod_1"),
        ]));
        let sup = supervisor(llm.clone(), &[content, media, export.clone()]);

        let report = sup.run("Make a video").await.unwrap();
        assert!(report.success);
        assert_eq!(export.calls(), 1);
        let requests = llm.requests();
        let rejected = &requests[2].last().unwrap().content;
        assert!(rejected.contains("delegate_export has not completed yet"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_content_exhaustion_aborts_run() {
        let content = StubAgent::failing(Stage::Content, u32::MAX);
        let media = StubAgent::new(Stage::Media);
        let export = StubAgent::new(Stage::Export);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            delegate("delegate_media", Some("prod_1")),
        ]));
        let sup = supervisor(llm, &[content.clone(), media.clone(), export.clone()]);

        let err = sup.run("Make a video").await.unwrap_err();
        match err {
            AgentError::RunAborted {
                stage,
                completed_stages,
                ..
            } => {
                assert_eq!(stage, Stage::Content);
                assert!(completed_stages.is_empty());
            }
            other => panic!("expected RunAborted, got {other:?}"),
        }
        assert_eq!(content.calls(), 3);
        assert_eq!(media.calls(), 0);
        assert_eq!(export.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_fallback_lets_export_run() {
        let content = StubAgent::new(Stage::Content);
        let media = StubAgent::failing(Stage::Media, u32::MAX);
        let export = StubAgent::new(Stage::Export);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            delegate("delegate_media", Some("prod_1")),
            delegate("delegate_export", Some("prod_1")),
            finish("prod_1"),
        ]));
        let sup = supervisor(llm, &[content, media.clone(), export.clone()]);

        let report = sup.run("Make a video").await.unwrap();
        assert!(report.degraded());
        assert_eq!(report.fallbacks.len(), 1);
        assert_eq!(report.fallbacks[0].stage, Stage::Media);
        assert_eq!(media.calls(), 3);
        assert_eq!(export.calls(), 1);
        let media_entry = &report.completed_stages[1];
        assert_eq!(media_entry.stage, Stage::Media);
        assert!(!media_entry.success);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_propagates() {
        let content = StubAgent::new(Stage::Content);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            "thinking...".to_string(),
        ]));
        let sup = supervisor(llm, &[content]).with_max_iterations(2);

        let err = sup.run("Make a video").await.unwrap_err();
        let stages: Vec<Stage> = err.completed_stages().iter().map(|c| c.stage).collect();
        assert_eq!(stages, vec![Stage::Content]);
        match err {
            AgentError::RunStopped { source, .. } => assert!(matches!(
                *source,
                AgentError::IterationBudgetExceeded { max_iterations: 2, .. }
            )),
            other => panic!("expected RunStopped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_delegate_keeps_completed_stages() {
        let content = StubAgent::new(Stage::Content);
        let media = StubAgent::cancelling(Stage::Media);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_content", None),
            delegate("delegate_media", Some("prod_1")),
        ]));
        let sup = supervisor(llm, &[content, media]);

        let err = sup.run("Make a video").await.unwrap_err();
        match &err {
            AgentError::RunStopped { source, .. } => {
                assert!(matches!(**source, AgentError::Cancelled))
            }
            other => panic!("expected RunStopped, got {other:?}"),
        }
        assert_eq!(err.completed_stages().len(), 1);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_import_transcript_reaches_content() {
        let import = StubAgent::new(Stage::Import);
        let content = StubAgent::new(Stage::Content);
        let llm = Arc::new(ScriptedLlmClient::new([
            delegate("delegate_import", None),
            delegate("delegate_content", None),
        ]));
        let sup = supervisor(llm.clone(), &[import, content.clone()]);

        let _ = sup.run("Import https://example.com/clip").await;
        assert_eq!(content.transcripts(), vec![Some("imported words".to_string())]);
        let requests = llm.requests();
        let import_result = &requests[1].last().unwrap().content;
        assert!(import_result.contains("imported words"));
    }
}
