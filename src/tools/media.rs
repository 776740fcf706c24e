//! 媒体阶段工具：场景画面、动画化、音效规划

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::session::{GeneratedVisual, Session, SessionStore, VisualKind};
use crate::tools::registry::{parse_args, schema_of};
use crate::tools::services::StudioServices;
use crate::tools::studio::load_session;
use crate::tools::{Tool, ToolName};

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateVisualsArgs {
    pub session_id: String,
    /// 画幅，如 16:9、9:16、1:1
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default)]
    pub style: Option<String>,
}

pub struct GenerateVisualsTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl GenerateVisualsTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for GenerateVisualsTool {
    fn name(&self) -> ToolName {
        ToolName::GenerateVisuals
    }

    fn description(&self) -> &str {
        "Generate an image for every scene that does not have a real visual yet. Successful scenes are saved even when others fail; call again to retry the failed ones."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<GenerateVisualsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: GenerateVisualsArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        if session.scenes().is_empty() {
            return Err(ToolError::failed("session has no scenes to illustrate"));
        }

        let pending: Vec<_> = session
            .scenes()
            .iter()
            .filter(|s| {
                session
                    .visual_for(s.index)
                    .map_or(true, |v| v.kind == VisualKind::Placeholder)
            })
            .cloned()
            .collect();

        let mut generated: Vec<GeneratedVisual> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        for scene in &pending {
            match self
                .services
                .generate_visual(scene, &args.aspect_ratio, args.style.as_deref())
                .await
            {
                Ok(v) => generated.push(v),
                Err(e) => failed.push(format!("scene {}: {e}", scene.index)),
            }
        }

        let count = generated.len();
        if count > 0 {
            let step = self.name().as_str();
            self.store
                .update(
                    &args.session_id,
                    Box::new(move |s: &mut Session| {
                        for v in generated {
                            s.upsert_visual(v);
                        }
                        s.touch(step);
                    }),
                )
                .await?;
        }

        if !failed.is_empty() {
            return Err(ToolError::Failed(format!(
                "generated {count} of {} visuals; failed: {}",
                pending.len(),
                failed.join("; ")
            )));
        }
        Ok(json!({
            "session_id": args.session_id,
            "generated": count,
            "total_scenes": session.scenes().len(),
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnimateVisualsArgs {
    pub session_id: String,
    /// 要动画化的场景序号；省略表示全部已有画面的场景
    #[serde(default)]
    pub scene_indices: Option<Vec<usize>>,
}

pub struct AnimateVisualsTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl AnimateVisualsTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for AnimateVisualsTool {
    fn name(&self) -> ToolName {
        ToolName::AnimateVisuals
    }

    fn description(&self) -> &str {
        "Turn generated scene images into short video clips. Requires generate_visuals first."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<AnimateVisualsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: AnimateVisualsArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;

        let mut animated = Vec::new();
        for scene in session.scenes() {
            if let Some(wanted) = &args.scene_indices {
                if !wanted.contains(&scene.index) {
                    continue;
                }
            }
            let Some(visual) = session.visual_for(scene.index) else {
                return Err(ToolError::Failed(format!(
                    "scene {} has no visual: call generate_visuals first",
                    scene.index
                )));
            };
            if visual.kind != VisualKind::Image {
                continue;
            }
            let clip = self
                .services
                .animate_visual(visual, scene)
                .await
                .map_err(|e| ToolError::Failed(format!("scene {}: {e}", scene.index)))?;
            animated.push(clip);
        }

        let count = animated.len();
        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    for v in animated {
                        s.upsert_visual(v);
                    }
                    s.touch(step);
                }),
            )
            .await?;

        Ok(json!({ "session_id": args.session_id, "animated": count }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanSfxArgs {
    pub session_id: String,
}

pub struct PlanSfxTool {
    services: Arc<dyn StudioServices>,
    store: Arc<dyn SessionStore>,
}

impl PlanSfxTool {
    pub fn new(services: Arc<dyn StudioServices>, store: Arc<dyn SessionStore>) -> Self {
        Self { services, store }
    }
}

#[async_trait]
impl Tool for PlanSfxTool {
    fn name(&self) -> ToolName {
        ToolName::PlanSfx
    }

    fn description(&self) -> &str {
        "Plan sound-effect cues for the session's scenes."
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<PlanSfxArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: PlanSfxArgs = parse_args(self.name(), args)?;
        let session = load_session(&self.store, &args.session_id).await?;
        let plan = session
            .content_plan
            .as_ref()
            .ok_or_else(|| ToolError::failed("session has no content plan"))?;
        let sfx = self
            .services
            .plan_sfx(plan)
            .await
            .map_err(ToolError::Failed)?;
        let cues = sfx.cues.len();

        let step = self.name().as_str();
        self.store
            .update(
                &args.session_id,
                Box::new(move |s: &mut Session| {
                    s.sfx_plan = Some(sfx);
                    s.touch(step);
                }),
            )
            .await?;

        Ok(json!({ "session_id": args.session_id, "cues": cues }))
    }
}
