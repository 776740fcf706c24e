//! 导入阶段工具：抓取来源、转写音频
//!
//! 导入发生在会话创建之前，因此这两个工具不写会话存储，结果经由阶段消息交给内容阶段。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::tools::registry::{parse_args, schema_of};
use crate::tools::services::StudioServices;
use crate::tools::{Tool, ToolName};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchSourceArgs {
    /// 视频 / 音频来源地址
    pub url: String,
}

pub struct FetchSourceTool {
    services: Arc<dyn StudioServices>,
}

impl FetchSourceTool {
    pub fn new(services: Arc<dyn StudioServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for FetchSourceTool {
    fn name(&self) -> ToolName {
        ToolName::FetchSource
    }

    fn description(&self) -> &str {
        "Fetch a source video/audio URL and return its title, duration and a media_uri for transcription."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<FetchSourceArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FetchSourceArgs = parse_args(self.name(), args)?;
        if args.url.trim().is_empty() {
            return Err(ToolError::failed("url must not be empty"));
        }
        let source = self
            .services
            .fetch_source(args.url.trim())
            .await
            .map_err(ToolError::Failed)?;
        Ok(json!({
            "url": source.url,
            "title": source.title,
            "duration_secs": source.duration_secs,
            "media_uri": source.media_uri,
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TranscribeAudioArgs {
    /// fetch_source 返回的 media_uri
    pub media_uri: String,
    /// 语言代码，如 en、zh
    #[serde(default)]
    pub language: Option<String>,
}

pub struct TranscribeAudioTool {
    services: Arc<dyn StudioServices>,
}

impl TranscribeAudioTool {
    pub fn new(services: Arc<dyn StudioServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Tool for TranscribeAudioTool {
    fn name(&self) -> ToolName {
        ToolName::TranscribeAudio
    }

    fn description(&self) -> &str {
        "Transcribe the audio track of a fetched source (media_uri from fetch_source)."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<TranscribeAudioArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: TranscribeAudioArgs = parse_args(self.name(), args)?;
        let transcript = self
            .services
            .transcribe(&args.media_uri, args.language.as_deref())
            .await
            .map_err(ToolError::Failed)?;
        Ok(json!({
            "media_uri": args.media_uri,
            "characters": transcript.chars().count(),
            "transcript": transcript,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockStudioServices;

    #[tokio::test]
    async fn test_fetch_then_transcribe() {
        let services: Arc<dyn StudioServices> = Arc::new(MockStudioServices::new());
        let fetched = FetchSourceTool::new(services.clone())
            .execute(json!({ "url": "https://example.com/song" }))
            .await
            .unwrap();
        let media_uri = fetched["media_uri"].as_str().unwrap().to_string();
        let out = TranscribeAudioTool::new(services)
            .execute(json!({ "media_uri": media_uri, "language": "en" }))
            .await
            .unwrap();
        assert!(out["transcript"].as_str().unwrap().contains("transcript of"));
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let err = FetchSourceTool::new(Arc::new(MockStudioServices::new()))
            .execute(json!({ "url": "  " }))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::failed("url must not be empty"));
    }
}
