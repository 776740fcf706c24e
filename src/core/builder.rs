//! Studio 构建器：按配置组装 LLM、会话存储、工具箱、阶段代理、恢复引擎与 Supervisor
//!
//! CLI 与测试共用同一套装配逻辑；任何组件都可在 build 之前替换。

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agents::{Stage, StageSubagent, Supervisor, UserPreferences};
use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine, RecoveryTable};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::react::ProgressCallback;
use crate::session::{MemorySessionStore, SessionStore, SqliteSessionStore};
use crate::tools::{MockStudioServices, StudioServices, StudioToolbox};

/// 按 API Key 与 provider 选择 LLM 后端；都没有时回落到 MockLlmClient
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key，或 provider 为 deepseek 且只有 OpenAI Key 时也走 DeepSeek 兼容端点
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!(%model, "using DeepSeek LLM");
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!(%model, "using OpenAI-compatible LLM");
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

/// 按 [store] 段打开会话存储
pub fn open_store(cfg: &AppConfig) -> Result<Arc<dyn SessionStore>, AgentError> {
    match cfg.store.backend.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemorySessionStore::new())),
        "sqlite" => {
            tracing::info!(path = %cfg.store.path.display(), "opening sqlite session store");
            Ok(Arc::new(SqliteSessionStore::open(&cfg.store.path)?))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown store backend '{other}' (expected memory or sqlite)"
        ))),
    }
}

/// 组装好的一套制作环境
pub struct Studio {
    pub supervisor: Supervisor,
    pub store: Arc<dyn SessionStore>,
}

pub struct StudioBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<dyn SessionStore>>,
    services: Option<Arc<dyn StudioServices>>,
    preferences: UserPreferences,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl StudioBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
            services: None,
            preferences: UserPreferences::default(),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_services(mut self, services: Arc<dyn StudioServices>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn with_preferences(mut self, preferences: UserPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> Result<Studio, AgentError> {
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config),
        };
        let store = match self.store {
            Some(store) => store,
            None => open_store(&self.config)?,
        };
        let services = self.services.unwrap_or_else(|| {
            tracing::warn!("no studio services configured, using offline mock services");
            Arc::new(MockStudioServices::new())
        });

        let toolbox = StudioToolbox::new(services, store.clone());
        let recovery = RecoveryEngine::new(RecoveryTable::from_config(&self.config.recovery))
            .with_store(store.clone());

        let mut supervisor = Supervisor::new(llm.clone(), Arc::new(recovery))
            .with_max_iterations(self.config.pipeline.supervisor_max_iterations)
            .with_preferences(self.preferences);
        for stage in Stage::ALL {
            let mut agent = StageSubagent::for_stage(
                stage,
                llm.clone(),
                &toolbox,
                self.config.tools.tool_timeout_secs,
                self.config.pipeline.max_iterations(stage),
            );
            if let Some(cancel) = &self.cancel {
                agent = agent.with_cancel_token(cancel.clone());
            }
            supervisor = supervisor.with_subagent(Arc::new(agent));
        }
        if let Some(progress) = self.progress {
            supervisor = supervisor.with_progress(progress);
        }
        if let Some(cancel) = self.cancel {
            supervisor = supervisor.with_cancel_token(cancel);
        }

        tracing::info!(
            backend = %self.config.store.backend,
            stages = supervisor.stages().len(),
            "studio ready"
        );
        Ok(Studio { supervisor, store })
    }
}

/// 便捷函数：加载配置并创建构建器；配置加载失败时用默认值
pub fn studio_builder(config_path: Option<PathBuf>) -> StudioBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    StudioBuilder::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_registers_every_stage() {
        let studio = StudioBuilder::new(AppConfig::default())
            .with_llm(Arc::new(MockLlmClient))
            .build()
            .unwrap();
        assert_eq!(studio.supervisor.stages(), Stage::ALL.to_vec());
    }

    #[test]
    fn test_unknown_store_backend_is_config_error() {
        let mut cfg = AppConfig::default();
        cfg.store.backend = "redis".into();
        assert!(matches!(open_store(&cfg), Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_sqlite_backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.store.backend = "sqlite".into();
        cfg.store.path = dir.path().join("sessions.db");
        assert!(open_store(&cfg).is_ok());
        assert!(cfg.store.path.exists());
    }
}
