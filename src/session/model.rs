//! 会话数据模型
//!
//! 一个 Session 对应一次制作：由内容阶段的 create_content_plan 创建，之后各阶段的工具按 ID 原地更新。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 会话 ID：不透明字符串，调用方只能原样传递
pub type SessionId = String;

/// 生成新的会话 ID（仅内容阶段调用）
pub fn new_session_id() -> SessionId {
    format!("prod_{}", uuid::Uuid::new_v4())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    pub heading: String,
    pub script: String,
    pub visual_prompt: String,
    pub duration_secs: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentPlan {
    pub title: String,
    pub summary: String,
    pub scenes: Vec<Scene>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NarrationSegment {
    pub scene_index: usize,
    pub text: String,
    pub audio_uri: String,
    pub duration_secs: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualKind {
    Image,
    Video,
    /// 媒体阶段降级时写入的占位画面
    Placeholder,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratedVisual {
    pub scene_index: usize,
    pub uri: String,
    pub kind: VisualKind,
    pub prompt: String,
}

impl GeneratedVisual {
    pub fn placeholder(scene: &Scene) -> Self {
        Self {
            scene_index: scene.index,
            uri: format!("placeholder://scene/{}", scene.index),
            kind: VisualKind::Placeholder,
            prompt: scene.visual_prompt.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SfxCue {
    pub scene_index: usize,
    pub description: String,
    pub offset_secs: f32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SfxPlan {
    pub cues: Vec<SfxCue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioMix {
    pub uri: String,
    pub duration_secs: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub uri: String,
    pub format: String,
    pub cue_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// 渲染完成的成片
    FinalRender,
    /// 导出阶段降级：返回素材包而非成片
    AssetBundle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub kind: ExportKind,
    pub uri: Option<String>,
    pub format: String,
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub uploaded_url: Option<String>,
}

impl ExportResult {
    pub fn asset_bundle(assets: Vec<String>) -> Self {
        Self {
            kind: ExportKind::AssetBundle,
            uri: None,
            format: "bundle".to_string(),
            assets,
            uploaded_url: None,
        }
    }
}

/// 单次制作的全部产物与簿记信息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub topic: String,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub content_plan: Option<ContentPlan>,
    #[serde(default)]
    pub narration: Vec<NarrationSegment>,
    #[serde(default)]
    pub visuals: Vec<GeneratedVisual>,
    #[serde(default)]
    pub sfx_plan: Option<SfxPlan>,
    #[serde(default)]
    pub audio_mix: Option<AudioMix>,
    #[serde(default)]
    pub subtitles: Option<SubtitleTrack>,
    #[serde(default)]
    pub export: Option<ExportResult>,
    /// 最近一次写入该会话的工具名
    #[serde(default)]
    pub current_step: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<SessionId>, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            topic: topic.into(),
            transcript: None,
            content_plan: None,
            narration: Vec::new(),
            visuals: Vec::new(),
            sfx_plan: None,
            audio_mix: None,
            subtitles: None,
            export: None,
            current_step: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, step: &str) {
        self.current_step = Some(step.to_string());
        self.updated_at = Utc::now();
    }

    pub fn scenes(&self) -> &[Scene] {
        self.content_plan
            .as_ref()
            .map(|p| p.scenes.as_slice())
            .unwrap_or(&[])
    }

    pub fn visual_for(&self, scene_index: usize) -> Option<&GeneratedVisual> {
        self.visuals.iter().find(|v| v.scene_index == scene_index)
    }

    /// 插入或替换某场景的画面（每个场景最多一条）
    pub fn upsert_visual(&mut self, visual: GeneratedVisual) {
        match self
            .visuals
            .iter_mut()
            .find(|v| v.scene_index == visual.scene_index)
        {
            Some(existing) => *existing = visual,
            None => self.visuals.push(visual),
        }
        self.visuals.sort_by_key(|v| v.scene_index);
    }

    /// 为缺少画面的场景补占位图，返回补了多少条
    pub fn fill_placeholder_visuals(&mut self) -> usize {
        let missing: Vec<Scene> = self
            .scenes()
            .iter()
            .filter(|s| self.visual_for(s.index).is_none())
            .cloned()
            .collect();
        for scene in &missing {
            self.upsert_visual(GeneratedVisual::placeholder(scene));
        }
        missing.len()
    }

    /// 当前已有的全部素材 URI（旁白、画面、混音、字幕），用于素材包
    pub fn asset_uris(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.narration.iter().map(|n| n.audio_uri.clone()).collect();
        assets.extend(self.visuals.iter().map(|v| v.uri.clone()));
        if let Some(mix) = &self.audio_mix {
            assets.push(mix.uri.clone());
        }
        if let Some(subs) = &self.subtitles {
            assets.push(subs.uri.clone());
        }
        assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(index: usize) -> Scene {
        Scene {
            index,
            heading: format!("Scene {index}"),
            script: "text".into(),
            visual_prompt: "a field".into(),
            duration_secs: 4.0,
        }
    }

    fn session_with_scenes(n: usize) -> Session {
        let mut s = Session::new("prod_test", "rain");
        s.content_plan = Some(ContentPlan {
            title: "Rain".into(),
            summary: "".into(),
            scenes: (0..n).map(scene).collect(),
        });
        s
    }

    #[test]
    fn test_session_id_format() {
        let a = new_session_id();
        let b = new_session_id();
        assert!(a.starts_with("prod_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_placeholders_fill_only_missing_scenes() {
        let mut s = session_with_scenes(3);
        s.upsert_visual(GeneratedVisual {
            scene_index: 1,
            uri: "img://1".into(),
            kind: VisualKind::Image,
            prompt: "p".into(),
        });
        assert_eq!(s.fill_placeholder_visuals(), 2);
        assert_eq!(s.visuals.len(), 3);
        assert_eq!(s.visual_for(1).map(|v| v.kind), Some(VisualKind::Image));
        assert_eq!(s.visual_for(0).map(|v| v.kind), Some(VisualKind::Placeholder));
    }

    #[test]
    fn test_upsert_replaces_existing_scene() {
        let mut s = session_with_scenes(1);
        s.fill_placeholder_visuals();
        s.upsert_visual(GeneratedVisual {
            scene_index: 0,
            uri: "vid://0".into(),
            kind: VisualKind::Video,
            prompt: "p".into(),
        });
        assert_eq!(s.visuals.len(), 1);
        assert_eq!(s.visuals[0].uri, "vid://0");
    }

    #[test]
    fn test_asset_uris_collects_everything() {
        let mut s = session_with_scenes(1);
        s.narration.push(NarrationSegment {
            scene_index: 0,
            text: "hi".into(),
            audio_uri: "audio://0".into(),
            duration_secs: 2.0,
        });
        s.fill_placeholder_visuals();
        s.audio_mix = Some(AudioMix {
            uri: "mix://final".into(),
            duration_secs: 2.0,
        });
        assert_eq!(
            s.asset_uris(),
            vec!["audio://0", "placeholder://scene/0", "mix://final"]
        );
    }
}
