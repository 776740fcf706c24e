//! 导出阶段工具：混音、字幕、渲染、云上传（仅服务端）

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::session::{ExportKind, Session, SessionStore};
use crate::tools::registry::{parse_args, schema_of};
use crate::tools::services::StudioServices;
use crate::tools::studio::load_session;
use crate::tools::{Tool, ToolName};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MixAudioArgs {
    pub session_id: String,
}

pub struct MixAudioTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl MixAudioTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for MixAudioTool {
    fn name(&self) -> ToolName {
        ToolName::MixAudio
    }

    fn description(&self) -> &str {
        "Mix narration and planned sound effects into the final audio track."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<MixAudioArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: MixAudioArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        if session.narration.is_empty() {
            return Err(ToolError::failed("session has no narration to mix"));
        }
        let mix = self
            .services
            .mix_audio(&session.narration, session.sfx_plan.as_ref())
            .await
            .map_err(ToolError::Failed)?;
        let out = json!({
            "session_id": args.session_id,
            "uri": mix.uri,
            "duration_secs": mix.duration_secs,
        });

        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    s.audio_mix = Some(mix);
                    s.touch(step);
                }),
            )
            .await?;
        Ok(out)
    }
}

fn default_subtitle_format() -> String {
    "srt".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateSubtitlesArgs {
    pub session_id: String,
    /// srt 或 vtt
    #[serde(default = "default_subtitle_format")]
    pub format: String,
}

pub struct GenerateSubtitlesTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl GenerateSubtitlesTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for GenerateSubtitlesTool {
    fn name(&self) -> ToolName {
        ToolName::GenerateSubtitles
    }

    fn description(&self) -> &str {
        "Generate a subtitle track (srt or vtt) from the session's narration."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<GenerateSubtitlesArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: GenerateSubtitlesArgs = parse_args(self.name(), args)?;
        let format = args.format.to_ascii_lowercase();
        if !matches!(format.as_str(), "srt" | "vtt") {
            return Err(ToolError::Failed(format!(
                "unsupported subtitle format '{}': use srt or vtt",
                args.format
            )));
        }
        let session = load_session(&self.store, &args.session_id).await?;
        if session.narration.is_empty() {
            return Err(ToolError::failed("session has no narration to subtitle"));
        }
        let track = self
            .services
            .generate_subtitles(&session.narration, &format)
            .await
            .map_err(ToolError::Failed)?;
        let out = json!({
            "session_id": args.session_id,
            "uri": track.uri,
            "cues": track.cue_count,
        });

        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    s.subtitles = Some(track);
                    s.touch(step);
                }),
            )
            .await?;
        Ok(out)
    }
}

fn default_export_format() -> String {
    "mp4".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenderExportArgs {
    pub session_id: String,
    #[serde(default = "default_export_format")]
    pub format: String,
}

pub struct RenderExportTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl RenderExportTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for RenderExportTool {
    fn name(&self) -> ToolName {
        ToolName::RenderExport
    }

    fn description(&self) -> &str {
        "Render the final video from the session's visuals, narration, audio mix and subtitles."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<RenderExportArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: RenderExportArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        if session.narration.is_empty() {
            return Err(ToolError::failed("session has no narration to render"));
        }
        let missing: Vec<String> = session
            .scenes()
            .iter()
            .filter(|s| session.visual_for(s.index).is_none())
            .map(|s| s.index.to_string())
            .collect();
        if session.scenes().is_empty() || !missing.is_empty() {
            return Err(ToolError::Failed(format!(
                "scenes without visuals: [{}]",
                missing.join(", ")
            )));
        }

        let export = self
            .services
            .render(&session, &args.format)
            .await
            .map_err(ToolError::Failed)?;
        let out = json!({
            "session_id": args.session_id,
            "uri": export.uri,
            "format": export.format,
        });

        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    s.export = Some(export);
                    s.touch(step);
                }),
            )
            .await?;
        Ok(out)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UploadToCloudArgs {
    pub session_id: String,
}

pub struct UploadToCloudTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl UploadToCloudTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for UploadToCloudTool {
    fn name(&self) -> ToolName {
        ToolName::UploadToCloud
    }

    fn description(&self) -> &str {
        "Upload the rendered video and return its public URL. Requires render_export first."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<UploadToCloudArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: UploadToCloudArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        let export = match session.export {
            Some(e) if e.kind == ExportKind::FinalRender => e,
            _ => return Err(ToolError::failed("nothing rendered yet: call render_export first")),
        };
        let url = self
            .services
            .upload(&export)
            .await
            .map_err(ToolError::Failed)?;

        let step = self.name().as_str();
        let stored = url.clone();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    if let Some(e) = s.export.as_mut() {
                        e.uploaded_url = Some(stored);
                    }
                    s.touch(step);
                }),
            )
            .await?;
        Ok(json!({ "session_id": args.session_id, "url": url }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{
        ContentPlan, GeneratedVisual, MemorySessionStore, NarrationSegment, Scene, Session,
        VisualKind,
    };
    use crate::tools::MockStudioServices;

    async fn ready_store(with_visuals: bool) -> Arc<dyn SessionStore> {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let mut session = Session::new("prod_export", "rain");
        let scene = Scene {
            index: 0,
            heading: "h".into(),
            script: "s".into(),
            visual_prompt: "p".into(),
            duration_secs: 2.0,
        };
        session.narration.push(NarrationSegment {
            scene_index: 0,
            text: "s".into(),
            audio_uri: "mock://narration/0.mp3".into(),
            duration_secs: 2.0,
        });
        if with_visuals {
            session.upsert_visual(GeneratedVisual {
                scene_index: 0,
                uri: "mock://image/0.png".into(),
                kind: VisualKind::Image,
                prompt: "p".into(),
            });
        }
        session.content_plan = Some(ContentPlan {
            title: "Rain".into(),
            summary: String::new(),
            scenes: vec![scene],
        });
        store.set(session).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_render_requires_visuals() {
        let store = ready_store(false).await;
        let err = RenderExportTool::new(Arc::new(MockStudioServices::new()), store)
            .execute(json!({ "session_id": "prod_export" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(msg) if msg.contains("[0]")));
    }

    #[tokio::test]
    async fn test_render_then_upload() {
        let store = ready_store(true).await;
        let services: Arc<dyn StudioServices> =
            Arc::new(MockStudioServices::new().with_cloud_upload());
        let upload = UploadToCloudTool::new(services.clone(), store.clone());
        assert!(upload
            .execute(json!({ "session_id": "prod_export" }))
            .await
            .is_err());

        RenderExportTool::new(services, store.clone())
            .execute(json!({ "session_id": "prod_export" }))
            .await
            .unwrap();
        let out = upload
            .execute(json!({ "session_id": "prod_export" }))
            .await
            .unwrap();
        assert!(out["url"].as_str().unwrap().starts_with("https://"));
        let export = store.get("prod_export").await.unwrap().unwrap().export.unwrap();
        assert_eq!(export.kind, ExportKind::FinalRender);
        assert!(export.uploaded_url.is_some());
    }

    #[tokio::test]
    async fn test_subtitle_format_checked() {
        let store = ready_store(true).await;
        let tool = GenerateSubtitlesTool::new(Arc::new(MockStudioServices::new()), store);
        assert!(tool
            .execute(json!({ "session_id": "prod_export", "format": "ass" }))
            .await
            .is_err());
        let out = tool
            .execute(json!({ "session_id": "prod_export", "format": "VTT" }))
            .await
            .unwrap();
        assert_eq!(out["cues"], json!(1));
    }

    #[tokio::test]
    async fn test_mix_audio_stores_track() {
        let store = ready_store(true).await;
        MixAudioTool::new(Arc::new(MockStudioServices::new()), store.clone())
            .execute(json!({ "session_id": "prod_export" }))
            .await
            .unwrap();
        let session = store.get("prod_export").await.unwrap().unwrap();
        assert!(session.audio_mix.is_some());
        assert_eq!(session.current_step.as_deref(), Some("mix_audio"));
    }
}
