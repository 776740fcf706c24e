//! 制作阶段定义
//!
//! 每个阶段 = 工具子集 + 完成标记 + 默认迭代预算 + 角色提示。阶段顺序只是给 Supervisor 的指引，不做调度。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tools::ToolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Import,
    Content,
    Media,
    /// 增强与导出
    Export,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Import, Stage::Content, Stage::Media, Stage::Export];

    /// 机器名（日志、进度事件、配置键）
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Import => "import",
            Stage::Content => "content",
            Stage::Media => "media",
            Stage::Export => "export",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Import => "Import",
            Stage::Content => "Content",
            Stage::Media => "Media",
            Stage::Export => "Enhancement/Export",
        }
    }

    /// 只有内容阶段可以在没有会话 ID 的情况下启动（它负责创建会话）
    pub fn creates_session(&self) -> bool {
        matches!(self, Stage::Content)
    }

    /// 阶段开始时是否必须已有会话
    pub fn requires_session(&self) -> bool {
        matches!(self, Stage::Media | Stage::Export)
    }

    /// 阶段声明的工具；实际绑定的是其中当前部署可用的部分
    pub fn tools(&self) -> &'static [ToolName] {
        match self {
            Stage::Import => &[ToolName::FetchSource, ToolName::TranscribeAudio],
            Stage::Content => &[
                ToolName::CreateContentPlan,
                ToolName::NarrateSegments,
                ToolName::ValidateContent,
            ],
            Stage::Media => &[
                ToolName::GenerateVisuals,
                ToolName::AnimateVisuals,
                ToolName::PlanSfx,
            ],
            Stage::Export => &[
                ToolName::MixAudio,
                ToolName::GenerateSubtitles,
                ToolName::RenderExport,
                ToolName::UploadToCloud,
            ],
        }
    }

    pub fn completion_markers(&self) -> &'static [&'static str] {
        match self {
            Stage::Import => &["transcript", "source"],
            Stage::Content => &["content_plan", "narration"],
            Stage::Media => &["visuals", "sfx_plan"],
            Stage::Export => &["export", "render"],
        }
    }

    pub fn default_max_iterations(&self) -> usize {
        match self {
            Stage::Import => 10,
            Stage::Content => 15,
            Stage::Media => 20,
            Stage::Export => 15,
        }
    }

    pub fn delegate_tool(&self) -> ToolName {
        match self {
            Stage::Import => ToolName::DelegateImport,
            Stage::Content => ToolName::DelegateContent,
            Stage::Media => ToolName::DelegateMedia,
            Stage::Export => ToolName::DelegateExport,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Stage::Import => {
                "You are the import agent of a video production studio. Fetch the source the user points to and transcribe its audio so the content agent can build on it. No production session exists yet; do not pass a session_id."
            }
            Stage::Content => {
                "You are the content agent of a video production studio. Create the scene-by-scene content plan (this creates the production session), narrate every scene, then validate the result."
            }
            Stage::Media => {
                "You are the media agent of a video production studio. Generate a visual for every scene, animate them where it helps, and plan sound effects. Work only on the session you are given."
            }
            Stage::Export => {
                "You are the enhancement and export agent of a video production studio. Mix the audio, generate subtitles and render the final export. Upload it when cloud upload is available. Work only on the session you are given."
            }
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_content_creates_session() {
        let creators: Vec<Stage> = Stage::ALL.into_iter().filter(|s| s.creates_session()).collect();
        assert_eq!(creators, vec![Stage::Content]);
        assert!(!Stage::Import.requires_session());
        assert!(Stage::Export.requires_session());
    }

    #[test]
    fn test_stage_tools_are_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for stage in Stage::ALL {
            for tool in stage.tools() {
                assert!(seen.insert(*tool), "{tool} bound to two stages");
            }
        }
    }

    #[test]
    fn test_budgets() {
        let budgets: Vec<usize> = Stage::ALL.iter().map(|s| s.default_max_iterations()).collect();
        assert_eq!(budgets, vec![10, 15, 20, 15]);
    }
}
