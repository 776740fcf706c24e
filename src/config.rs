//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `REEL__*` 覆盖（双下划线表示嵌套，如 `REEL__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::agents::Stage;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub pipeline: PipelineSection,
    pub recovery: RecoverySection,
    pub tools: ToolsSection,
    pub store: StoreSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

/// [pipeline] 段：各循环的迭代上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub supervisor_max_iterations: usize,
    pub import_max_iterations: usize,
    pub content_max_iterations: usize,
    pub media_max_iterations: usize,
    pub export_max_iterations: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            supervisor_max_iterations: 12,
            import_max_iterations: Stage::Import.default_max_iterations(),
            content_max_iterations: Stage::Content.default_max_iterations(),
            media_max_iterations: Stage::Media.default_max_iterations(),
            export_max_iterations: Stage::Export.default_max_iterations(),
        }
    }
}

impl PipelineSection {
    pub fn max_iterations(&self, stage: Stage) -> usize {
        match stage {
            Stage::Import => self.import_max_iterations,
            Stage::Content => self.content_max_iterations,
            Stage::Media => self.media_max_iterations,
            Stage::Export => self.export_max_iterations,
        }
    }
}

/// [recovery] 段：退避参数与按阶段覆盖
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoverySection {
    /// 首次重试前的等待（毫秒），之后按 2 的幂增长
    pub initial_delay_ms: u64,
    /// 单次等待上限（毫秒）；不设则不封顶
    pub max_delay_ms: Option<u64>,
    pub import: StageRecoverySection,
    pub content: StageRecoverySection,
    pub media: StageRecoverySection,
    pub export: StageRecoverySection,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: None,
            import: StageRecoverySection::default(),
            content: StageRecoverySection::default(),
            media: StageRecoverySection::default(),
            export: StageRecoverySection::default(),
        }
    }
}

impl RecoverySection {
    pub fn stage(&self, stage: Stage) -> &StageRecoverySection {
        match stage {
            Stage::Import => &self.import,
            Stage::Content => &self.content,
            Stage::Media => &self.media,
            Stage::Export => &self.export,
        }
    }
}

/// [recovery.<stage>] 段：未设置的项沿用内置策略
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StageRecoverySection {
    pub max_retries: Option<u32>,
    pub continue_on_failure: Option<bool>,
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 300,
        }
    }
}

/// [store] 段：memory 或 sqlite
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: String,
    /// sqlite 数据库文件路径
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: PathBuf::from("reel.db"),
        }
    }
}

/// 从 config 目录加载配置，环境变量 REEL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 REEL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REEL")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
