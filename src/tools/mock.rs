//! 离线 StudioServices 实现（用于演示与测试，无需任何外部服务）
//!
//! 产出确定性的 mock:// 地址；可通过 with_failures 为某个操作注入前 N 次失败。

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::session::{
    AudioMix, ContentPlan, ExportKind, ExportResult, GeneratedVisual, NarrationSegment, Scene,
    Session, SfxCue, SfxPlan, SubtitleTrack, VisualKind,
};
use crate::tools::services::{PlanRequest, SourceInfo, StudioServices};

const SCENE_SECS: f32 = 5.0;

#[derive(Debug, Default)]
pub struct MockStudioServices {
    cloud_upload: bool,
    failures: Mutex<HashMap<&'static str, usize>>,
}

impl MockStudioServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟服务端部署：启用 upload_to_cloud
    pub fn with_cloud_upload(mut self) -> Self {
        self.cloud_upload = true;
        self
    }

    /// 让 operation 的前 times 次调用失败
    pub fn with_failures(self, operation: &'static str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, times);
        self
    }

    fn check(&self, operation: &'static str) -> Result<(), String> {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        match failures.get_mut(operation) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(format!("{operation}: simulated service failure"))
            }
            _ => Ok(()),
        }
    }
}

fn slug(text: &str) -> String {
    let s: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    s.split('-')
        .filter(|p| !p.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait]
impl StudioServices for MockStudioServices {
    async fn fetch_source(&self, url: &str) -> Result<SourceInfo, String> {
        self.check("fetch_source")?;
        Ok(SourceInfo {
            url: url.to_string(),
            title: format!("Imported {}", slug(url)),
            duration_secs: 60.0,
            media_uri: format!("mock://source/{}", slug(url)),
        })
    }

    async fn transcribe(&self, media_uri: &str, language: Option<&str>) -> Result<String, String> {
        self.check("transcribe")?;
        Ok(format!(
            "[{}] transcript of {media_uri}",
            language.unwrap_or("en")
        ))
    }

    async fn plan_content(&self, request: &PlanRequest) -> Result<ContentPlan, String> {
        self.check("plan_content")?;
        let count = request.scene_count.max(1);
        let scenes = (0..count)
            .map(|i| Scene {
                index: i,
                heading: format!("{}, part {}", request.topic, i + 1),
                script: format!("Narration for part {} of {}", i + 1, request.topic),
                visual_prompt: format!(
                    "{} scene {} in {} style",
                    request.topic,
                    i + 1,
                    request.style.as_deref().unwrap_or("cinematic")
                ),
                duration_secs: SCENE_SECS,
            })
            .collect();
        Ok(ContentPlan {
            title: request.topic.clone(),
            summary: format!("A {count}-scene production about {}", request.topic),
            scenes,
        })
    }

    async fn narrate(&self, scene: &Scene, voice: Option<&str>) -> Result<NarrationSegment, String> {
        self.check("narrate")?;
        Ok(NarrationSegment {
            scene_index: scene.index,
            text: scene.script.clone(),
            audio_uri: format!(
                "mock://narration/{}/{}.mp3",
                voice.unwrap_or("default"),
                scene.index
            ),
            duration_secs: scene.duration_secs,
        })
    }

    async fn generate_visual(
        &self,
        scene: &Scene,
        aspect_ratio: &str,
        _style: Option<&str>,
    ) -> Result<GeneratedVisual, String> {
        self.check("generate_visual")?;
        Ok(GeneratedVisual {
            scene_index: scene.index,
            uri: format!(
                "mock://image/{}/{}.png",
                aspect_ratio.replace(':', "x"),
                scene.index
            ),
            kind: VisualKind::Image,
            prompt: scene.visual_prompt.clone(),
        })
    }

    async fn animate_visual(
        &self,
        visual: &GeneratedVisual,
        scene: &Scene,
    ) -> Result<GeneratedVisual, String> {
        self.check("animate_visual")?;
        Ok(GeneratedVisual {
            scene_index: scene.index,
            uri: format!("mock://video/{}.mp4", scene.index),
            kind: VisualKind::Video,
            prompt: visual.prompt.clone(),
        })
    }

    async fn plan_sfx(&self, plan: &ContentPlan) -> Result<SfxPlan, String> {
        self.check("plan_sfx")?;
        let mut offset = 0.0;
        let cues = plan
            .scenes
            .iter()
            .map(|s| {
                let cue = SfxCue {
                    scene_index: s.index,
                    description: format!("ambience for {}", s.heading),
                    offset_secs: offset,
                };
                offset += s.duration_secs;
                cue
            })
            .collect();
        Ok(SfxPlan { cues })
    }

    async fn mix_audio(
        &self,
        narration: &[NarrationSegment],
        _sfx: Option<&SfxPlan>,
    ) -> Result<AudioMix, String> {
        self.check("mix_audio")?;
        Ok(AudioMix {
            uri: "mock://mix/final.wav".to_string(),
            duration_secs: narration.iter().map(|n| n.duration_secs).sum(),
        })
    }

    async fn generate_subtitles(
        &self,
        narration: &[NarrationSegment],
        format: &str,
    ) -> Result<SubtitleTrack, String> {
        self.check("generate_subtitles")?;
        Ok(SubtitleTrack {
            uri: format!("mock://subtitles/track.{format}"),
            format: format.to_string(),
            cue_count: narration.len(),
        })
    }

    async fn render(&self, session: &Session, format: &str) -> Result<ExportResult, String> {
        self.check("render")?;
        Ok(ExportResult {
            kind: ExportKind::FinalRender,
            uri: Some(format!("mock://render/{}.{format}", session.id)),
            format: format.to_string(),
            assets: Vec::new(),
            uploaded_url: None,
        })
    }

    async fn upload(&self, export: &ExportResult) -> Result<String, String> {
        self.check("upload")?;
        let uri = export.uri.as_deref().ok_or("nothing rendered to upload")?;
        Ok(uri.replace("mock://render/", "https://cdn.example.invalid/"))
    }

    fn cloud_upload_available(&self) -> bool {
        self.cloud_upload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let services = MockStudioServices::new().with_failures("plan_sfx", 1);
        let plan = ContentPlan {
            title: "t".into(),
            summary: "s".into(),
            scenes: vec![],
        };
        assert!(services.plan_sfx(&plan).await.is_err());
        assert!(services.plan_sfx(&plan).await.is_ok());
    }

    #[tokio::test]
    async fn test_plan_has_requested_scene_count() {
        let plan = MockStudioServices::new()
            .plan_content(&PlanRequest {
                topic: "Rainy city".into(),
                scene_count: 4,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(plan.scenes.len(), 4);
        assert_eq!(plan.scenes[3].index, 3);
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("https://Example.com/a b"), "https-example-com-a-b");
    }
}
