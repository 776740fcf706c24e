//! 阶段工具装配
//!
//! StudioToolbox 持有生成式服务与会话存储，为每个阶段构建它的工具子集；
//! 云上传仅在服务声明支持时注册，否则该工具在推理循环中表现为「环境不支持」。

use std::sync::Arc;

use crate::core::ToolError;
use crate::session::{Session, SessionStore};
use crate::tools::content::{CreateContentPlanTool, NarrateSegmentsTool, ValidateContentTool};
use crate::tools::export::{GenerateSubtitlesTool, MixAudioTool, RenderExportTool, UploadToCloudTool};
use crate::tools::import::{FetchSourceTool, TranscribeAudioTool};
use crate::tools::media::{AnimateVisualsTool, GenerateVisualsTool, PlanSfxTool};
use crate::tools::services::StudioServices;
use crate::tools::{ToolName, ToolRegistry};

#[derive(Clone)]
pub struct StudioToolbox {
    pub services: Arc<dyn StudioServices>,
    pub store: Arc<dyn SessionStore>,
}

impl StudioToolbox {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }

    /// 当前部署下可用的全部阶段工具
    pub fn registry(&self) -> ToolRegistry {
        let s = &self.services;
        let st = &self.store;
        let mut tools = ToolRegistry::new();
        tools.register(FetchSourceTool::new(s.clone()));
        tools.register(TranscribeAudioTool::new(s.clone()));
        tools.register(CreateContentPlanTool::new(s.clone(), st.clone()));
        tools.register(NarrateSegmentsTool::new(s.clone(), st.clone()));
        tools.register(ValidateContentTool::new(st.clone()));
        tools.register(GenerateVisualsTool::new(s.clone(), st.clone()));
        tools.register(AnimateVisualsTool::new(s.clone(), st.clone()));
        tools.register(PlanSfxTool::new(s.clone(), st.clone()));
        tools.register(MixAudioTool::new(s.clone(), st.clone()));
        tools.register(GenerateSubtitlesTool::new(s.clone(), st.clone()));
        tools.register(RenderExportTool::new(s.clone(), st.clone()));
        if s.cloud_upload_available() {
            tools.register(UploadToCloudTool::new(s.clone(), st.clone()));
        }
        tools
    }

    /// 某阶段声明的工具中、当前部署实际可用的那部分
    pub fn registry_for(&self, names: &[ToolName]) -> ToolRegistry {
        self.registry().subset(names)
    }
}

/// 按 ID 读取会话；不存在时提示模型使用创建阶段返回的原值
pub(crate) async fn load_session(
    store: &Arc<dyn SessionStore>,
    session_id: &str,
) -> Result<Session, ToolError> {
    store.get(session_id).await?.ok_or_else(|| {
        ToolError::Failed(format!(
            "unknown session_id '{session_id}': use the exact session_id returned by create_content_plan"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::tools::MockStudioServices;

    #[test]
    fn test_upload_only_registered_when_supported() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let plain = StudioToolbox::new(Arc::new(MockStudioServices::new()), store.clone());
        assert!(!plain.registry().contains(ToolName::UploadToCloud));

        let server = StudioToolbox::new(
            Arc::new(MockStudioServices::new().with_cloud_upload()),
            store,
        );
        assert!(server.registry().contains(ToolName::UploadToCloud));
        let export = server.registry_for(&[ToolName::RenderExport, ToolName::UploadToCloud]);
        assert_eq!(export.len(), 2);
    }
}
