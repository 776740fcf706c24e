//! 委派边界上传递的数据：上下文、结果、已完成阶段、用户偏好与运行报告

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::Stage;
use crate::react::ProgressCallback;
use crate::session::SessionId;

/// 用户偏好，全部可选，会写进每个阶段的指令
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub style: Option<String>,
    pub voice: Option<String>,
    pub aspect_ratio: Option<String>,
    pub language: Option<String>,
    pub export_format: Option<String>,
}

impl UserPreferences {
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("style", &self.style),
            ("voice", &self.voice),
            ("aspect_ratio", &self.aspect_ratio),
            ("language", &self.language),
            ("export_format", &self.export_format),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
        .collect()
    }

    /// 渲染为指令中的一段；没有偏好时为 None
    pub fn render(&self) -> Option<String> {
        let entries = self.entries();
        if entries.is_empty() {
            return None;
        }
        let lines: Vec<String> = entries.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
        Some(format!("User preferences:\n{}", lines.join("\n")))
    }
}

/// 已完成（或降级完成）的阶段记录，只追加不修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStage {
    pub stage: Stage,
    pub completed_at: DateTime<Utc>,
    pub duration: Duration,
    pub success: bool,
}

impl CompletedStage {
    pub fn now(stage: Stage, duration: Duration, success: bool) -> Self {
        Self {
            stage,
            completed_at: Utc::now(),
            duration,
            success,
        }
    }
}

/// Subagent 的输入；每次尝试克隆一份
#[derive(Clone, Default)]
pub struct SubagentContext {
    pub session_id: Option<SessionId>,
    pub instruction: String,
    pub completed_stages: Vec<CompletedStage>,
    pub preferences: UserPreferences,
    /// 导入阶段得到的转写，交给内容阶段
    pub transcript: Option<String>,
    pub progress: Option<ProgressCallback>,
}

impl SubagentContext {
    pub fn new(instruction: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            session_id,
            instruction: instruction.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for SubagentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubagentContext")
            .field("session_id", &self.session_id)
            .field("instruction", &self.instruction)
            .field("completed_stages", &self.completed_stages)
            .field("preferences", &self.preferences)
            .field("transcript", &self.transcript.as_ref().map(|t| t.chars().count()))
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Subagent 的输出，Supervisor 只依据它分支
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubagentResult {
    pub success: bool,
    pub session_id: Option<SessionId>,
    pub completed_stage: CompletedStage,
    /// 各次失败尝试的错误信息
    pub errors: Vec<String>,
    pub duration: Duration,
    pub message: String,
    pub fallback_applied: bool,
    /// 导入阶段 transcribe_audio 的输出
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedFallback {
    pub stage: Stage,
    pub message: String,
}

/// 一次完整制作的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub session_id: Option<SessionId>,
    pub completed_stages: Vec<CompletedStage>,
    pub fallbacks: Vec<AppliedFallback>,
    pub message: String,
    pub duration: Duration,
}

impl RunReport {
    /// 是否有阶段以降级方式完成
    pub fn degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_render() {
        assert_eq!(UserPreferences::default().render(), None);
        let prefs = UserPreferences {
            voice: Some("warm".into()),
            aspect_ratio: Some("9:16".into()),
            ..Default::default()
        };
        assert_eq!(
            prefs.render().unwrap(),
            "User preferences:\n- voice: warm\n- aspect_ratio: 9:16"
        );
    }
}
