//! 进度事件：推理循环在每次工具调用前后上报，Subagent 再补上整体进度

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

/// 单条进度事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// 阶段名（supervisor 或 import / content / media / export）
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub message: String,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// 阶段内进度 0..=100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_percent: Option<u8>,
    /// 整条流水线进度 0..=100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_percent: Option<u8>,
}

impl ProgressEvent {
    pub fn started(stage: &str, tool: &str, stage_percent: u8) -> Self {
        Self {
            stage: stage.to_string(),
            tool: Some(tool.to_string()),
            message: format!("running {tool}"),
            is_complete: false,
            success: None,
            stage_percent: Some(stage_percent),
            overall_percent: None,
        }
    }

    pub fn finished(stage: &str, tool: &str, success: bool, stage_percent: u8) -> Self {
        Self {
            stage: stage.to_string(),
            tool: Some(tool.to_string()),
            message: if success {
                format!("{tool} done")
            } else {
                format!("{tool} failed")
            },
            is_complete: true,
            success: Some(success),
            stage_percent: Some(stage_percent),
            overall_percent: None,
        }
    }
}

/// 进度回调；在工具调用的路径上同步执行，应当尽快返回
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

pub fn emit(progress: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(cb) = progress {
        cb(event);
    }
}

/// 把回调接到一个无界通道上，便于异步消费
pub fn progress_channel() -> (ProgressCallback, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cb: ProgressCallback = Arc::new(move |ev| {
        let _ = tx.send(ev);
    });
    (cb, rx)
}
