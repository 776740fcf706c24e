//! 工具执行器
//!
//! 持有 ToolRegistry 与可选超时，execute(tool, args) 在超时内调用 registry.execute，
//! 超时转为 ToolError::Failed；每次调用输出一条结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::ToolError;
use crate::tools::{Tool, ToolName, ToolRegistry};

/// 工具名查找结果：已绑定 / 已知但当前阶段或部署中不可用 / 完全未知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLookup {
    Bound(ToolName),
    Unavailable(ToolName),
    Unknown(String),
}

/// 工具执行器：对每次调用施加超时（委派类工具不设超时）
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Option<Duration>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Some(Duration::from_secs(timeout_secs)),
        }
    }

    /// 不设超时：用于 Supervisor 的委派工具（单次委派可能持续数分钟）
    pub fn without_timeout(registry: ToolRegistry) -> Self {
        Self {
            registry,
            timeout: None,
        }
    }

    pub fn lookup(&self, name: &str) -> ToolLookup {
        match name.parse::<ToolName>() {
            Ok(tool) if self.registry.contains(tool) => ToolLookup::Bound(tool),
            Ok(tool) => ToolLookup::Unavailable(tool),
            Err(_) => ToolLookup::Unknown(name.to_string()),
        }
    }

    pub async fn execute(&self, tool: ToolName, args: Value) -> Result<Value, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = match self.timeout {
            Some(limit) => match timeout(limit, self.registry.execute(tool, args)).await {
                Ok(r) => r,
                Err(_) => Err(ToolError::Failed(format!(
                    "{tool} timed out after {}s",
                    limit.as_secs()
                ))),
            },
            None => self.registry.execute(tool, args).await,
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Failed(_)) => "error",
            Err(ToolError::Abort(_)) => "abort",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool.as_str(),
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        result
    }

    /// 追加注册一个工具（推理循环用它挂上 finish）
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.registry.register(tool);
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn tool_names(&self) -> Vec<ToolName> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> ToolName {
            ToolName::RenderExport
        }

        fn description(&self) -> &str {
            "slow"
        }

        async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_lookup_classifies_names() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let executor = ToolExecutor::new(registry, 1);
        assert_eq!(
            executor.lookup("render_export"),
            ToolLookup::Bound(ToolName::RenderExport)
        );
        assert_eq!(
            executor.lookup("upload_to_cloud"),
            ToolLookup::Unavailable(ToolName::UploadToCloud)
        );
        assert_eq!(
            executor.lookup("make_it_pop"),
            ToolLookup::Unknown("make_it_pop".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_failure() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);
        let executor = ToolExecutor::new(registry, 1);
        let err = executor
            .execute(ToolName::RenderExport, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed(msg) if msg.contains("timed out")));
    }
}
