//! Pipeline 构建器：按配置装配 LLM、工具箱、Agent、渲染端与 Orchestrator
//!
//! 二进制入口与集成测试共用同一套装配逻辑；测试可通过 `with_llm` / `with_renderer` 注入替身。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agents::{CodeAgent, ResearchAgent, Researcher, SceneGenerator, TemplateSceneWriter};
use crate::config::AppConfig;
use crate::core::orchestrator::{Orchestrator, StageTimeouts};
use crate::core::recovery::RetryBudgets;
use crate::llm::{create_deepseek_client, JsonMode, LlmClient, MockLlmClient, OpenAiClient};
use crate::render::{CachedRenderer, ManimRenderer, RenderBackend, RenderPool};
use crate::schema::{SyncPolicy, ValidationPolicy, Validator};
use crate::store::RunStore;
use crate::tools::Toolbox;

/// 渲染超时之外留给 Orchestrator 的余量
const RENDER_GRACE_SECS: u64 = 30;

/// `[llm] temperature / json_mode` 覆盖后端默认值
fn tune_client(client: OpenAiClient, cfg: &AppConfig) -> OpenAiClient {
    let client = client.with_temperature(cfg.llm.temperature);
    match cfg.llm.json_mode.as_deref() {
        None => client,
        Some(raw) => match JsonMode::parse(raw) {
            Some(mode) => client.with_json_mode(mode),
            None => {
                tracing::warn!("Unknown json_mode '{}', keeping {:?}", raw, client.json_mode());
                client
            }
        },
    }
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let deepseek_key = std::env::var("DEEPSEEK_API_KEY").ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    // 有 DeepSeek Key，或配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点
    let deepseek = match (&deepseek_key, &openai_key) {
        (Some(key), _) if provider != "openai" || openai_key.is_none() => Some(key.clone()),
        (None, Some(key)) if provider == "deepseek" => Some(key.clone()),
        _ => None,
    };

    if let Some(key) = deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(tune_client(
            create_deepseek_client(Some(&cfg.llm.model), &key),
            cfg,
        ))
    } else if let Some(key) = openai_key {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(tune_client(
            OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, Some(&key)),
            cfg,
        ))
    } else {
        tracing::warn!("No API key set, using Mock LLM (research will report tool unavailability)");
        Arc::new(MockLlmClient::new())
    }
}

pub struct PipelineBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    renderer: Option<Arc<dyn RenderBackend>>,
    toolbox: Option<Arc<Toolbox>>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            renderer: None,
            toolbox: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn RenderBackend>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_toolbox(mut self, toolbox: Arc<Toolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        self.llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config))
    }

    pub fn build_toolbox(&self) -> Arc<Toolbox> {
        self.toolbox
            .clone()
            .unwrap_or_else(|| Arc::new(Toolbox::from_config(&self.config.tools)))
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        let p = &self.config.pipeline;
        SyncPolicy {
            max_gap_secs: p.max_narration_gap_secs,
            words_per_minute: p.words_per_minute,
            ..SyncPolicy::default()
        }
    }

    pub fn budgets(&self) -> RetryBudgets {
        let p = &self.config.pipeline;
        RetryBudgets {
            max_research_retries: p.max_research_retries,
            max_codegen_retries: p.max_codegen_retries,
            render_retry_budget: p.render_retry_budget,
        }
    }

    pub fn timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            research: self.config.pipeline.research_timeout(),
            codegen: self.config.pipeline.codegen_timeout(),
            render: Duration::from_secs(self.config.render.timeout_secs + RENDER_GRACE_SECS),
        }
    }

    pub fn build_validator(&self, toolbox: &Toolbox) -> Validator {
        Validator::new(ValidationPolicy {
            require_cues: self.config.pipeline.require_section_cues,
            known_icons: Some(toolbox.known_icons()),
        })
    }

    pub fn build_researcher(&self, llm: Arc<dyn LlmClient>, toolbox: Arc<Toolbox>) -> Arc<dyn Researcher> {
        Arc::new(
            ResearchAgent::new(llm, toolbox)
                .with_self_revisions(self.config.pipeline.research_self_revisions)
                .with_require_cues(self.config.pipeline.require_section_cues),
        )
    }

    /// `[render] codegen_mode`：llm（默认）或 template
    pub fn build_generator(&self, llm: Arc<dyn LlmClient>, toolbox: &Toolbox) -> Arc<dyn SceneGenerator> {
        let supported = self.config.render.supported_cues.clone();
        match self.config.render.codegen_mode.to_lowercase().as_str() {
            "template" => {
                tracing::info!("Scene generation: template");
                Arc::new(
                    TemplateSceneWriter::new(supported, self.sync_policy())
                        .with_icon_paths(toolbox.icon_paths()),
                )
            }
            other => {
                if other != "llm" {
                    tracing::warn!("Unknown codegen_mode '{}', using llm", other);
                }
                Arc::new(
                    CodeAgent::new(llm, supported, self.sync_policy())
                        .with_icon_paths(toolbox.icon_paths()),
                )
            }
        }
    }

    pub fn build_renderer(&self) -> Arc<dyn RenderBackend> {
        if let Some(renderer) = &self.renderer {
            return renderer.clone();
        }
        let manim = ManimRenderer::from_config(&self.config.render);
        if self.config.render.cache {
            Arc::new(CachedRenderer::new(manim))
        } else {
            Arc::new(manim)
        }
    }

    pub fn build_store(&self) -> RunStore {
        RunStore::new(self.config.app.output_dir.clone())
    }

    /// 装配完整的 Orchestrator
    pub fn build(&self) -> Orchestrator {
        let llm = self.build_llm();
        let toolbox = self.build_toolbox();
        let render = &self.config.render;

        Orchestrator::new(
            self.build_researcher(llm.clone(), toolbox.clone()),
            self.build_generator(llm, &toolbox),
            self.build_renderer(),
        )
        .with_validator(self.build_validator(&toolbox))
        .with_scene_contract(self.sync_policy(), self.config.render.supported_cues.clone())
        .with_budgets(self.budgets())
        .with_timeouts(self.timeouts())
        .with_render_pool(Arc::new(RenderPool::new(render.max_concurrent, render.queue_capacity)))
        .with_admission_backoff(Duration::from_millis(self.config.pipeline.admission_backoff_ms))
        .with_store(self.build_store())
    }
}

/// 便捷函数：加载配置（失败时使用默认值）并创建构建器
pub fn create_pipeline_builder(config_path: Option<PathBuf>) -> PipelineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    PipelineBuilder::new(config)
}
