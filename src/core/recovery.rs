//! 恢复策略与 execute_subagent
//!
//! 每个阶段一条 RecoveryPolicy：是否允许降级继续、最大重试次数、退避、降级动作。
//! execute_subagent 用显式循环做有限次尝试（指数退避），不可重试的错误立即抛出；
//! 重试耗尽后若阶段允许降级则落实降级动作并返回 success = false 的结果，否则抛出最后一个错误。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agents::{CompletedStage, Stage, Subagent, SubagentContext, SubagentResult};
use crate::config::RecoverySection;
use crate::core::progress::overall_progress;
use crate::core::AgentError;
use crate::react::{emit, ProgressEvent};
use crate::session::{ExportResult, Session, SessionId, SessionStore, VisualKind};

/// 阶段失败后的降级动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackAction {
    /// 导入失败：不带转写继续
    ProceedWithoutTranscript,
    /// 媒体失败：缺失画面的场景用占位图
    PlaceholderVisuals,
    /// 导出失败：返回素材包而非成片
    AssetBundle,
}

impl FallbackAction {
    pub fn description(&self) -> &'static str {
        match self {
            FallbackAction::ProceedWithoutTranscript => "proceeding without an imported transcript",
            FallbackAction::PlaceholderVisuals => "using placeholder visuals",
            FallbackAction::AssetBundle => "returning an asset bundle instead of a final render",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    pub continue_on_failure: bool,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Option<Duration>,
    pub fallback: Option<FallbackAction>,
}

impl RecoveryPolicy {
    pub fn for_stage(stage: Stage) -> Self {
        let (continue_on_failure, fallback) = match stage {
            Stage::Import => (true, Some(FallbackAction::ProceedWithoutTranscript)),
            Stage::Content => (false, None),
            Stage::Media => (true, Some(FallbackAction::PlaceholderVisuals)),
            Stage::Export => (true, Some(FallbackAction::AssetBundle)),
        };
        Self {
            continue_on_failure,
            max_retries: 2,
            initial_delay: Duration::from_millis(1000),
            max_delay: None,
            fallback,
        }
    }

    /// 第 attempt 次失败后的等待：initial * 2^(attempt-1)，可选上限
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(20);
        let delay = self.initial_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// 全部阶段的策略
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryTable {
    policies: HashMap<Stage, RecoveryPolicy>,
}

impl Default for RecoveryTable {
    fn default() -> Self {
        Self {
            policies: Stage::ALL
                .into_iter()
                .map(|s| (s, RecoveryPolicy::for_stage(s)))
                .collect(),
        }
    }
}

impl RecoveryTable {
    /// 以默认表为底，叠加 [recovery] 配置
    pub fn from_config(cfg: &RecoverySection) -> Self {
        let mut table = Self::default();
        for stage in Stage::ALL {
            let overrides = cfg.stage(stage);
            let policy = table.policy_mut(stage);
            policy.initial_delay = Duration::from_millis(cfg.initial_delay_ms);
            policy.max_delay = cfg.max_delay_ms.map(Duration::from_millis);
            if let Some(n) = overrides.max_retries {
                policy.max_retries = n;
            }
            if let Some(c) = overrides.continue_on_failure {
                policy.continue_on_failure = c;
            }
        }
        table
    }

    pub fn with_policy(mut self, stage: Stage, policy: RecoveryPolicy) -> Self {
        self.policies.insert(stage, policy);
        self
    }

    pub fn policy(&self, stage: Stage) -> RecoveryPolicy {
        self.policies
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| RecoveryPolicy::for_stage(stage))
    }

    fn policy_mut(&mut self, stage: Stage) -> &mut RecoveryPolicy {
        self.policies
            .entry(stage)
            .or_insert_with(|| RecoveryPolicy::for_stage(stage))
    }
}

/// 恢复引擎：策略表 + 可选的会话存储（用于落实降级动作）
#[derive(Default)]
pub struct RecoveryEngine {
    table: RecoveryTable,
    store: Option<Arc<dyn SessionStore>>,
}

impl RecoveryEngine {
    pub fn new(table: RecoveryTable) -> Self {
        Self { table, store: None }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 按阶段策略执行一个 Subagent
    ///
    /// 失败的尝试若已创建会话（FailedWithSession），重试沿用该会话；最终失败时删除它。
    pub async fn execute_subagent(
        &self,
        subagent: &dyn Subagent,
        mut context: SubagentContext,
    ) -> Result<SubagentResult, AgentError> {
        let stage = subagent.stage();
        let policy = self.table.policy(stage);
        let start = Instant::now();
        let mut errors: Vec<String> = Vec::new();
        let mut created: Option<SessionId> = None;
        let mut attempt: u32 = 0;

        let last_error = loop {
            attempt += 1;
            let (e, surfaced) = match subagent.invoke(context.clone()).await {
                Ok(mut result) => {
                    if attempt > 1 {
                        tracing::info!(stage = stage.name(), attempt, "stage succeeded after retry");
                    }
                    errors.append(&mut result.errors);
                    result.errors = errors;
                    return Ok(result);
                }
                Err(e) => e.split_session(),
            };
            if let Some(id) = surfaced {
                if context.session_id.is_none() {
                    tracing::info!(stage = stage.name(), session_id = %id, "reusing session from failed attempt");
                    context.session_id = Some(id.clone());
                    created = Some(id);
                }
            }
            if !e.is_retryable() {
                tracing::error!(stage = stage.name(), attempt, error = %e, "non-retryable stage error");
                self.discard_created(created.as_deref()).await;
                return Err(e);
            }
            tracing::warn!(
                stage = stage.name(),
                attempt,
                max_attempts = policy.max_attempts(),
                error = %e,
                "stage attempt failed"
            );
            errors.push(format!("attempt {attempt}: {e}"));
            if attempt >= policy.max_attempts() {
                break e;
            }
            tokio::time::sleep(policy.delay_for(attempt)).await;
        };

        match (policy.continue_on_failure, policy.fallback) {
            (true, Some(fallback)) => {
                let message = self.apply_fallback(fallback, context.session_id.as_deref()).await;
                tracing::warn!(stage = stage.name(), fallback = ?fallback, %message, "fallback applied");
                emit(
                    context.progress.as_ref(),
                    ProgressEvent {
                        stage: stage.name().to_string(),
                        tool: None,
                        message: format!("{stage} stage degraded: {message}"),
                        is_complete: true,
                        success: Some(false),
                        stage_percent: Some(100),
                        overall_percent: Some(overall_progress(stage, 100.0)),
                    },
                );
                let duration = start.elapsed();
                Ok(SubagentResult {
                    success: false,
                    session_id: context.session_id,
                    completed_stage: CompletedStage::now(stage, duration, false),
                    errors,
                    duration,
                    message,
                    fallback_applied: true,
                    transcript: None,
                })
            }
            _ => {
                tracing::error!(stage = stage.name(), attempts = attempt, "stage exhausted its retries");
                self.discard_created(created.as_deref()).await;
                Err(last_error)
            }
        }
    }

    /// 删除失败阶段留下的会话；没有存储或删除失败只记日志
    async fn discard_created(&self, session_id: Option<&str>) {
        let (Some(store), Some(id)) = (self.store.as_ref(), session_id) else {
            return;
        };
        match store.delete(id).await {
            Ok(_) => tracing::info!(session_id = id, "discarded session of failed stage"),
            Err(e) => tracing::warn!(session_id = id, error = %e, "could not discard session"),
        }
    }

    /// 落实降级动作，返回描述；存储写入失败只记日志
    async fn apply_fallback(&self, fallback: FallbackAction, session_id: Option<&str>) -> String {
        let (Some(store), Some(id)) = (self.store.as_ref(), session_id) else {
            return fallback.description().to_string();
        };
        let updated = match fallback {
            FallbackAction::ProceedWithoutTranscript => {
                return fallback.description().to_string();
            }
            FallbackAction::PlaceholderVisuals => {
                store
                    .update(
                        id,
                        Box::new(|s: &mut Session| {
                            if s.fill_placeholder_visuals() > 0 {
                                s.touch("placeholder_visuals");
                            }
                        }),
                    )
                    .await
            }
            FallbackAction::AssetBundle => {
                store
                    .update(
                        id,
                        Box::new(|s: &mut Session| {
                            s.export = Some(ExportResult::asset_bundle(s.asset_uris()));
                            s.touch("asset_bundle");
                        }),
                    )
                    .await
            }
        };
        match updated {
            Ok(session) => match fallback {
                FallbackAction::PlaceholderVisuals => {
                    let n = session
                        .visuals
                        .iter()
                        .filter(|v| v.kind == VisualKind::Placeholder)
                        .count();
                    format!("{} ({n} placeholder visuals)", fallback.description())
                }
                FallbackAction::AssetBundle => {
                    let n = session.export.map(|e| e.assets.len()).unwrap_or(0);
                    format!("{} ({n} assets)", fallback.description())
                }
                FallbackAction::ProceedWithoutTranscript => fallback.description().to_string(),
            },
            Err(e) => {
                tracing::warn!(session_id = id, error = %e, "could not write fallback to session store");
                fallback.description().to_string()
            }
        }
    }
}
