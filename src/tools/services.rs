//! 生成式服务边界
//!
//! 真正的生成操作（抓取、转写、文案规划、配音、画面 / 视频、音效、混音、字幕、渲染、云上传）
//! 都在本 crate 之外实现；编排核心只通过 StudioServices 调用它们。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::{
    AudioMix, ContentPlan, ExportResult, GeneratedVisual, NarrationSegment, Scene, Session,
    SfxPlan, SubtitleTrack,
};

/// 导入来源的元信息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub url: String,
    pub title: String,
    pub duration_secs: f32,
    /// 可供转写的媒体地址
    pub media_uri: String,
}

/// 文案规划请求
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub topic: String,
    pub transcript: Option<String>,
    pub scene_count: usize,
    pub style: Option<String>,
}

#[async_trait]
pub trait StudioServices: Send + Sync {
    async fn fetch_source(&self, url: &str) -> Result<SourceInfo, String>;

    async fn transcribe(&self, media_uri: &str, language: Option<&str>) -> Result<String, String>;

    async fn plan_content(&self, request: &PlanRequest) -> Result<ContentPlan, String>;

    async fn narrate(&self, scene: &Scene, voice: Option<&str>) -> Result<NarrationSegment, String>;

    async fn generate_visual(
        &self,
        scene: &Scene,
        aspect_ratio: &str,
        style: Option<&str>,
    ) -> Result<GeneratedVisual, String>;

    /// 把静态画面转为短视频
    async fn animate_visual(
        &self,
        visual: &GeneratedVisual,
        scene: &Scene,
    ) -> Result<GeneratedVisual, String>;

    async fn plan_sfx(&self, plan: &ContentPlan) -> Result<SfxPlan, String>;

    async fn mix_audio(
        &self,
        narration: &[NarrationSegment],
        sfx: Option<&SfxPlan>,
    ) -> Result<AudioMix, String>;

    async fn generate_subtitles(
        &self,
        narration: &[NarrationSegment],
        format: &str,
    ) -> Result<SubtitleTrack, String>;

    async fn render(&self, session: &Session, format: &str) -> Result<ExportResult, String>;

    /// 上传成片，返回公开地址
    async fn upload(&self, export: &ExportResult) -> Result<String, String>;

    /// 当前部署是否具备云上传能力（仅服务端环境）
    fn cloud_upload_available(&self) -> bool {
        false
    }
}
