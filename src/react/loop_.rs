//! 推理循环
//!
//! Plan -> Act (一个或多个 Tool) -> Observe -> 下一轮 Plan，直到模型以符合完成条件的 finish 结束，
//! 或者迭代预算耗尽。Supervisor 与四个 Subagent 共用这一个原语。
//!
//! 每轮中的工具调用按顺序处理：
//! - 本次循环已成功执行过的工具 → skipped，不再执行
//! - 已知但未绑定的工具 → unavailable；完全未知的名字 → unknown
//! - 参数里的 session_id 与本阶段会话不一致 → rejected，不执行；缺省时补上本阶段会话
//! - ToolError::Failed → error 结果回填；ToolError::Abort → 终止循环

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ToolError};
use crate::llm::{LlmClient, Message};
use crate::react::events::{emit, ProgressCallback, ProgressEvent};
use crate::react::planner::{
    compose_system_prompt, parse_model_turn, tool_results_message, ModelTurn, Planner, ToolCall,
    ToolResult, ToolStatus,
};
use crate::tools::{parse_args, FinishArgs, FinishTool, ToolExecutor, ToolLookup, ToolName};

const NUDGE: &str = "No tool call found in your reply. Continue the task with a JSON tool call, or call \"finish\" if the work is complete.";

/// 额外的完成前置条件（如 Supervisor 要求导出阶段已记录）
pub type CompletionGate = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// finish 调用被接受的条件
#[derive(Clone, Default)]
pub struct CompletionCriteria {
    /// 至少命中其中一个
    pub expected_markers: Vec<String>,
    /// finish 必须携带本阶段的会话 ID
    pub require_session: bool,
    pub gate: Option<CompletionGate>,
}

impl fmt::Debug for CompletionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCriteria")
            .field("expected_markers", &self.expected_markers)
            .field("require_session", &self.require_session)
            .field("gate", &self.gate.is_some())
            .finish()
    }
}

impl CompletionCriteria {
    pub fn new<I, S>(markers: I, require_session: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expected_markers: markers.into_iter().map(Into::into).collect(),
            require_session,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: CompletionGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// 检查一次 finish 声明；Err 中是回填给模型的拒绝原因
    pub fn check(&self, args: &FinishArgs, expected_session: Option<&str>) -> Result<(), String> {
        if !self.expected_markers.is_empty() {
            let hit = args.markers.iter().any(|m| {
                let m = m.trim().to_ascii_lowercase();
                self.expected_markers.iter().any(|e| *e == m)
            });
            if !hit {
                return Err(format!(
                    "finish needs at least one of the completion markers: {}",
                    self.expected_markers.join(", ")
                ));
            }
        }

        if self.require_session {
            match (expected_session, args.session_id.as_deref()) {
                (Some(expected), Some(given)) if expected == given => {}
                (Some(expected), Some(given)) => {
                    return Err(format!(
                        "session_id '{given}' is not this production's session; the session_id is '{expected}'"
                    ))
                }
                (Some(expected), None) => {
                    return Err(format!("finish must include session_id '{expected}'"))
                }
                (None, _) => {
                    return Err(
                        "no session exists yet: the session_id must come from a tool result, never invent one"
                            .to_string(),
                    )
                }
            }
        }

        match &self.gate {
            Some(gate) => gate(),
            None => Ok(()),
        }
    }
}

/// 一次循环调用的输入
#[derive(Clone)]
pub struct LoopRequest {
    /// 代理名（日志与进度事件中的 stage 字段）
    pub agent: String,
    pub system_prompt: String,
    pub initial_message: String,
    pub max_iterations: usize,
    pub criteria: CompletionCriteria,
    /// 调用方已知的会话 ID；为 None 时由工具结果中首个 session_id 确定
    pub bound_session: Option<String>,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<CancellationToken>,
}

impl LoopRequest {
    pub fn new(
        agent: impl Into<String>,
        system_prompt: impl Into<String>,
        initial_message: impl Into<String>,
        max_iterations: usize,
        criteria: CompletionCriteria,
    ) -> Self {
        Self {
            agent: agent.into(),
            system_prompt: system_prompt.into(),
            initial_message: initial_message.into(),
            max_iterations,
            criteria,
            bound_session: None,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.bound_session = session_id;
        self
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: Option<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub success: bool,
    /// finish 中的总结
    pub final_message: String,
    pub duration: Duration,
    /// 绑定的会话 ID，或循环中工具结果首次给出的会话 ID
    pub session_id: Option<String>,
    pub iterations: usize,
    /// 按执行顺序记录成功过的工具
    pub completed_tools: Vec<ToolName>,
    /// 成功工具的输出，与 completed_tools 一一对应
    pub outputs: Vec<(ToolName, Value)>,
    /// 含 finish 的那一轮的全部调用结果
    pub final_results: Vec<ToolResult>,
}

impl LoopOutcome {
    /// 某个工具的成功输出
    pub fn output_of(&self, tool: ToolName) -> Option<&Value> {
        self.outputs.iter().find(|(t, _)| *t == tool).map(|(_, v)| v)
    }
}

/// 推理循环：持有 LLM 与绑定好工具集的执行器
pub struct ReasoningLoop {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
}

fn percent(done: usize, total: usize) -> u8 {
    (done.min(total) * 100 / total.max(1)) as u8
}

impl ReasoningLoop {
    /// finish 总是被挂到执行器上
    pub fn new(llm: Arc<dyn LlmClient>, mut executor: ToolExecutor) -> Self {
        if !executor.registry().contains(ToolName::Finish) {
            executor.register(FinishTool);
        }
        Self { llm, executor }
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.executor.tool_names()
    }

    /// 运行一次循环；失败前若已从工具结果得到会话 ID（且请求未绑定会话），以 FailedWithSession 带出
    pub async fn run(&self, request: LoopRequest) -> Result<LoopOutcome, AgentError> {
        let mut surfaced: Option<String> = None;
        match self.drive(&request, &mut surfaced).await {
            Err(e) if request.bound_session.is_none() => match surfaced {
                Some(session_id) => Err(AgentError::FailedWithSession {
                    session_id,
                    source: Box::new(e),
                }),
                None => Err(e),
            },
            other => other,
        }
    }

    async fn drive(
        &self,
        request: &LoopRequest,
        surfaced: &mut Option<String>,
    ) -> Result<LoopOutcome, AgentError> {
        let start = Instant::now();
        let agent = request.agent.as_str();
        let planner = Planner::new(
            self.llm.clone(),
            compose_system_prompt(
                &request.system_prompt,
                self.executor.registry(),
                &request.criteria.expected_markers,
            ),
        );
        let bound: Vec<String> = self
            .executor
            .tool_names()
            .iter()
            .map(|n| n.as_str().to_string())
            .collect();
        let work_tools = bound.len().saturating_sub(1);

        let mut messages = vec![Message::user(request.initial_message.clone())];
        let mut completed: HashSet<ToolName> = HashSet::new();
        let mut completed_order: Vec<ToolName> = Vec::new();
        let mut outputs: Vec<(ToolName, Value)> = Vec::new();

        tracing::info!(agent, max_iterations = request.max_iterations, "loop started");

        for iteration in 1..=request.max_iterations {
            if request.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                tracing::warn!(agent, iteration, "loop cancelled");
                return Err(AgentError::Cancelled);
            }

            let reply = planner.plan(&messages).await?;
            messages.push(Message::assistant(reply.clone()));

            let calls = match parse_model_turn(&reply, iteration) {
                Ok(ModelTurn::Calls(calls)) => calls,
                Ok(ModelTurn::Text(_)) => {
                    tracing::debug!(agent, iteration, "text reply without tool call");
                    messages.push(Message::user(NUDGE));
                    continue;
                }
                Err(e) => {
                    tracing::warn!(agent, iteration, error = %e, "unparseable model reply");
                    messages.push(Message::user(format!(
                        "Your reply could not be parsed ({e}). Reply with a single JSON object as described."
                    )));
                    continue;
                }
            };

            let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
            let mut finished: Option<String> = None;

            for (pos, call) in calls.iter().enumerate() {
                let expected_session = request
                    .bound_session
                    .as_deref()
                    .or(surfaced.as_deref());

                let name = match self.executor.lookup(&call.tool) {
                    ToolLookup::Bound(name) => name,
                    ToolLookup::Unavailable(name) => {
                        let reason = if name.is_environment_dependent() {
                            format!("{name} is not available in this environment; continue without it")
                        } else {
                            format!("{name} is not available in this stage")
                        };
                        results.push(ToolResult::notice(call, ToolStatus::Unavailable, reason));
                        continue;
                    }
                    ToolLookup::Unknown(unknown) => {
                        results.push(ToolResult::notice(
                            call,
                            ToolStatus::Unknown,
                            format!("unknown tool '{unknown}'; available tools: {}", bound.join(", ")),
                        ));
                        continue;
                    }
                };

                if name == ToolName::Finish {
                    match self.check_finish(call, &request.criteria, expected_session) {
                        Ok(args) => {
                            results.push(ToolResult::new(
                                call,
                                ToolStatus::Ok,
                                json!({ "complete": true }),
                            ));
                            finished = Some(args.summary);
                            for rest in &calls[pos + 1..] {
                                results.push(ToolResult::notice(
                                    rest,
                                    ToolStatus::Skipped,
                                    "not executed: finish already completed the task",
                                ));
                            }
                            break;
                        }
                        Err(reason) => {
                            tracing::info!(agent, iteration, %reason, "finish rejected");
                            results.push(ToolResult::notice(call, ToolStatus::Rejected, reason));
                            continue;
                        }
                    }
                }

                if completed.contains(&name) {
                    results.push(ToolResult::notice(
                        call,
                        ToolStatus::Skipped,
                        format!("{name} already completed in this task; not executed again"),
                    ));
                    continue;
                }

                let mut args = call.args.clone();
                if let (Some(expected), Some(obj)) = (expected_session, args.as_object_mut()) {
                    let missing = obj.get("session_id").map_or(true, Value::is_null);
                    if missing && self.executor.registry().accepts_session_id(name) {
                        obj.insert("session_id".into(), json!(expected));
                    }
                }

                if let (Some(expected), Some(given)) = (
                    expected_session,
                    args.get("session_id").and_then(Value::as_str),
                ) {
                    if given != expected {
                        tracing::warn!(agent, tool = %name, given, expected, "session id mismatch");
                        results.push(ToolResult::notice(
                            call,
                            ToolStatus::Rejected,
                            format!(
                                "session_id '{given}' does not belong to this production; use '{expected}' exactly"
                            ),
                        ));
                        continue;
                    }
                }

                emit(
                    request.progress.as_ref(),
                    ProgressEvent::started(agent, name.as_str(), percent(completed.len(), work_tools)),
                );
                match self.executor.execute(name, args).await {
                    Ok(output) => {
                        completed.insert(name);
                        completed_order.push(name);
                        if let Some(id) = output.get("session_id").and_then(Value::as_str) {
                            if surfaced.is_none() {
                                *surfaced = Some(id.to_string());
                            } else if surfaced.as_deref() != Some(id) {
                                tracing::warn!(agent, ignored = id, "second session id ignored");
                            }
                        }
                        emit(
                            request.progress.as_ref(),
                            ProgressEvent::finished(
                                agent,
                                name.as_str(),
                                true,
                                percent(completed.len(), work_tools),
                            ),
                        );
                        outputs.push((name, output.clone()));
                        results.push(ToolResult::new(call, ToolStatus::Ok, output));
                    }
                    Err(ToolError::Failed(msg)) => {
                        emit(
                            request.progress.as_ref(),
                            ProgressEvent::finished(
                                agent,
                                name.as_str(),
                                false,
                                percent(completed.len(), work_tools),
                            ),
                        );
                        results.push(ToolResult::new(
                            call,
                            ToolStatus::Error,
                            json!({ "error": msg }),
                        ));
                    }
                    Err(ToolError::Abort(reason)) => {
                        emit(
                            request.progress.as_ref(),
                            ProgressEvent::finished(
                                agent,
                                name.as_str(),
                                false,
                                percent(completed.len(), work_tools),
                            ),
                        );
                        tracing::error!(agent, tool = %name, %reason, "tool aborted loop");
                        return Err(AgentError::ToolAborted {
                            tool: name.to_string(),
                            reason,
                        });
                    }
                }
            }

            messages.push(tool_results_message(&results));

            if let Some(summary) = finished {
                let session_id = request.bound_session.clone().or(surfaced.clone());
                let (_, _, total_tokens) = planner.token_usage();
                tracing::info!(
                    agent,
                    iterations = iteration,
                    session_id = session_id.as_deref().unwrap_or("-"),
                    total_tokens,
                    "loop completed"
                );
                return Ok(LoopOutcome {
                    success: true,
                    final_message: summary,
                    duration: start.elapsed(),
                    session_id,
                    iterations: iteration,
                    completed_tools: completed_order,
                    outputs,
                    final_results: results,
                });
            }
        }

        tracing::warn!(agent, max_iterations = request.max_iterations, "iteration budget exhausted");
        Err(AgentError::IterationBudgetExceeded {
            agent: request.agent.clone(),
            max_iterations: request.max_iterations,
        })
    }

    fn check_finish(
        &self,
        call: &ToolCall,
        criteria: &CompletionCriteria,
        expected_session: Option<&str>,
    ) -> Result<FinishArgs, String> {
        let args: FinishArgs =
            parse_args(ToolName::Finish, call.args.clone()).map_err(|e| e.to_string())?;
        criteria.check(&args, expected_session)?;
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::react::progress_channel;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 计数工具；可选地在输出里给出 session_id
    struct CountingTool {
        name: ToolName,
        calls: Arc<AtomicUsize>,
        session_id: Option<&'static str>,
        abort: bool,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> ToolName {
            self.name
        }

        fn description(&self) -> &str {
            "counts calls"
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.abort {
                return Err(ToolError::Abort("stop".into()));
            }
            Ok(json!({ "session_id": self.session_id }))
        }
    }

    fn counting(name: ToolName, session_id: Option<&'static str>) -> (CountingTool, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingTool {
                name,
                calls: calls.clone(),
                session_id,
                abort: false,
            },
            calls,
        )
    }

    fn reasoning_loop(llm: Arc<ScriptedLlmClient>, tools: Vec<CountingTool>) -> ReasoningLoop {
        let mut registry = ToolRegistry::new();
        for t in tools {
            registry.register(t);
        }
        ReasoningLoop::new(llm, ToolExecutor::new(registry, 5))
    }

    fn request(markers: &[&str], require_session: bool) -> LoopRequest {
        LoopRequest::new(
            "media",
            "You are the media agent.",
            "Illustrate the production.",
            5,
            CompletionCriteria::new(markers.iter().copied(), require_session),
        )
    }

    fn last_results(llm: &ScriptedLlmClient, request_index: usize) -> Vec<Value> {
        let reqs = llm.requests();
        let body = reqs[request_index]
            .last()
            .unwrap()
            .content
            .strip_prefix(crate::react::planner::TOOL_RESULTS_PREFIX)
            .unwrap()
            .trim()
            .to_string();
        serde_json::from_str(&body).unwrap()
    }

    #[tokio::test]
    async fn test_completed_tool_not_executed_twice() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [{"tool": "plan_sfx", "args": {}}, {"tool": "plan_sfx", "args": {}}]}"#,
            r#"{"tool": "plan_sfx", "args": {}}"#,
            r#"{"tool": "finish", "args": {"markers": ["sfx_plan"]}}"#,
        ]));
        let (tool, calls) = counting(ToolName::PlanSfx, None);
        let outcome = reasoning_loop(llm.clone(), vec![tool])
            .run(request(&["sfx_plan"], false))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.completed_tools, vec![ToolName::PlanSfx]);

        let first = last_results(&llm, 1);
        assert_eq!(first[0]["status"], "ok");
        assert_eq!(first[1]["status"], "skipped");
        assert_eq!(last_results(&llm, 2)[0]["status"], "skipped");
    }

    #[tokio::test]
    async fn test_unknown_and_unavailable_tools_are_results() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [{"id": "a", "tool": "make_it_pop"}, {"id": "b", "tool": "upload_to_cloud"}]}"#,
            r#"{"tool": "finish", "args": {"markers": ["visuals"]}}"#,
        ]));
        let (tool, _) = counting(ToolName::GenerateVisuals, None);
        let outcome = reasoning_loop(llm.clone(), vec![tool])
            .run(request(&["visuals"], false))
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);

        let results = last_results(&llm, 1);
        assert_eq!(results[0]["call_id"], "a");
        assert_eq!(results[0]["status"], "unknown");
        assert!(results[0]["output"]["message"]
            .as_str()
            .unwrap()
            .contains("generate_visuals"));
        assert_eq!(results[1]["status"], "unavailable");
    }

    #[tokio::test]
    async fn test_text_reply_is_not_completion() {
        let llm = Arc::new(ScriptedLlmClient::new([
            "The visuals are complete and look great.",
            r#"{"tool": "finish", "args": {"markers": ["visuals"]}}"#,
        ]));
        let outcome = reasoning_loop(llm.clone(), vec![])
            .run(request(&["visuals"], false))
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(llm.requests()[1].last().unwrap().content, NUDGE);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let llm = Arc::new(ScriptedLlmClient::new(["thinking", "still thinking", "hmm"]));
        let mut req = request(&["visuals"], false);
        req.max_iterations = 3;
        let err = reasoning_loop(llm, vec![]).run(req).await.unwrap_err();
        assert!(matches!(
            err,
            AgentError::IterationBudgetExceeded { max_iterations: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_fabricated_session_rejected_at_finish() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "finish", "args": {"markers": ["visuals"], "session_id": "SESSION_ID"}}"#,
            r#"{"tool": "finish", "args": {"markers": ["visuals"], "session_id": "prod_real"}}"#,
        ]));
        let outcome = reasoning_loop(llm.clone(), vec![])
            .run(request(&["visuals"], true).with_session(Some("prod_real".into())))
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.session_id.as_deref(), Some("prod_real"));
        assert_eq!(last_results(&llm, 1)[0]["status"], "rejected");
    }

    #[tokio::test]
    async fn test_missing_marker_rejected() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "finish", "args": {"markers": ["done"]}}"#,
            r#"{"tool": "finish", "args": {"markers": ["Visuals"]}}"#,
        ]));
        let outcome = reasoning_loop(llm, vec![])
            .run(request(&["visuals", "sfx_plan"], false))
            .await
            .unwrap();
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn test_surfaced_session_binds_later_calls() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "create_content_plan", "args": {"topic": "rain"}}"#,
            r#"{"tool": "narrate_segments", "args": {"session_id": "session_123"}}"#,
            r#"{"tool": "finish", "args": {"markers": ["content_plan"], "session_id": "prod_new"}}"#,
        ]));
        let (create, _) = counting(ToolName::CreateContentPlan, Some("prod_new"));
        let (narrate, narrate_calls) = counting(ToolName::NarrateSegments, None);
        let mut req = request(&["content_plan"], true);
        req.agent = "content".into();
        let outcome = reasoning_loop(llm.clone(), vec![create, narrate])
            .run(req)
            .await
            .unwrap();
        assert_eq!(outcome.session_id.as_deref(), Some("prod_new"));
        assert_eq!(narrate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(last_results(&llm, 2)[0]["status"], "rejected");
    }

    #[tokio::test]
    async fn test_calls_after_accepted_finish_are_skipped() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [{"tool": "plan_sfx", "args": {}}, {"id": "f", "tool": "finish", "args": {"markers": ["sfx_plan"]}}, {"id": "late", "tool": "mix_audio", "args": {}}]}"#,
        ]));
        let (sfx, _) = counting(ToolName::PlanSfx, None);
        let (mix, mix_calls) = counting(ToolName::MixAudio, None);
        let outcome = reasoning_loop(llm, vec![sfx, mix])
            .run(request(&["sfx_plan"], false))
            .await
            .unwrap();
        assert_eq!(mix_calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.output_of(ToolName::PlanSfx), Some(&json!({ "session_id": null })));
        let late = outcome
            .final_results
            .iter()
            .find(|r| r.call_id == "late")
            .expect("late call has a result");
        assert_eq!(late.status, ToolStatus::Skipped);
    }

    #[tokio::test]
    async fn test_failure_after_surfaced_session_reports_it() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "create_content_plan", "args": {"topic": "rain"}}"#,
            r#"{"tool": "narrate_segments", "args": {"session_id": "prod_new"}}"#,
        ]));
        let (create, _) = counting(ToolName::CreateContentPlan, Some("prod_new"));
        let (mut narrate, _) = counting(ToolName::NarrateSegments, None);
        narrate.abort = true;
        let err = reasoning_loop(llm, vec![create, narrate])
            .run(request(&["content_plan"], true))
            .await
            .unwrap_err();
        let (inner, session) = err.split_session();
        assert_eq!(session.as_deref(), Some("prod_new"));
        assert!(matches!(inner, AgentError::ToolAborted { .. }));
    }

    #[tokio::test]
    async fn test_bound_session_failure_is_not_wrapped() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "render_export", "args": {"session_id": "prod_1"}}"#,
        ]));
        let (mut tool, _) = counting(ToolName::RenderExport, Some("prod_1"));
        tool.abort = true;
        let err = reasoning_loop(llm, vec![tool])
            .run(request(&["export"], true).with_session(Some("prod_1".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolAborted { .. }));
    }

    /// 原样返回参数，schema 中声明 session_id
    struct EchoArgsTool;

    #[async_trait]
    impl Tool for EchoArgsTool {
        fn name(&self) -> ToolName {
            ToolName::NarrateSegments
        }

        fn description(&self) -> &str {
            "echoes its arguments"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "session_id": { "type": "string" } } })
        }

        async fn execute(&self, args: Value) -> Result<Value, ToolError> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn test_missing_session_id_filled_from_bound_session() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool_calls": [{"id": "n", "tool": "narrate_segments", "args": {"voice": "warm"}}, {"tool": "finish", "args": {"markers": ["narration"], "session_id": "prod_1"}}]}"#,
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(EchoArgsTool);
        let engine = ReasoningLoop::new(llm, ToolExecutor::new(registry, 5));
        let outcome = engine
            .run(request(&["narration"], true).with_session(Some("prod_1".into())))
            .await
            .unwrap();
        let echoed = outcome.output_of(ToolName::NarrateSegments).unwrap();
        assert_eq!(echoed["session_id"], "prod_1");
        assert_eq!(echoed["voice"], "warm");
    }

    #[tokio::test]
    async fn test_abort_propagates() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"tool": "render_export", "args": {}}"#]));
        let (mut tool, _) = counting(ToolName::RenderExport, None);
        tool.abort = true;
        let err = reasoning_loop(llm, vec![tool])
            .run(request(&["export"], false))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolAborted { tool, .. } if tool == "render_export"));
    }

    #[tokio::test]
    async fn test_cancelled_at_iteration_boundary() {
        let llm = Arc::new(ScriptedLlmClient::new(["never read"]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = reasoning_loop(llm.clone(), vec![])
            .run(request(&["visuals"], false).with_cancel(Some(cancel)))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_progress_around_each_tool() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "plan_sfx", "args": {}}"#,
            r#"{"tool": "finish", "args": {"markers": ["sfx_plan"]}}"#,
        ]));
        let (tool, _) = counting(ToolName::PlanSfx, None);
        let (cb, mut rx) = progress_channel();
        reasoning_loop(llm, vec![tool])
            .run(request(&["sfx_plan"], false).with_progress(Some(cb)))
            .await
            .unwrap();
        let before = rx.recv().await.unwrap();
        let after = rx.recv().await.unwrap();
        assert_eq!((before.is_complete, before.stage_percent), (false, Some(0)));
        assert_eq!((after.success, after.stage_percent), (Some(true), Some(100)));
    }
}
