//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `VISO__*` 覆盖（双下划线表示嵌套，如 `VISO__PIPELINE__MAX_RESEARCH_RETRIES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::schema::CueKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub render: RenderSection,
}

/// [app] 段：产物输出目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 每个 run 的中间产物写入 `<output_dir>/<run_id>/`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// [llm] 段：后端与模型选择
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    /// 结构化输出：schema / object / off；缺省时 DeepSeek 用 object，其余用 schema
    pub json_mode: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            temperature: None,
            json_mode: None,
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    crate::llm::DEEPSEEK_CHAT.to_string()
}

/// [tools] 段：工具超时、并发上限、搜索端点、图标目录
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 所有 run 共享的工具并发上限
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub search: SearchSection,
    /// 本地图标库目录（svg / png）
    #[serde(default = "default_icons_dir")]
    pub icons_dir: PathBuf,
    /// 本地资料目录（pdf / txt / md）；配置后排在检索链首位
    #[serde(default)]
    pub local_docs_dir: Option<PathBuf>,
    /// 代码分析可读取的根目录
    #[serde(default = "default_code_root")]
    pub code_root: PathBuf,
    #[serde(default = "default_code_excerpt_chars")]
    pub code_excerpt_chars: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            max_concurrent: default_max_concurrent_tools(),
            search: SearchSection::default(),
            icons_dir: default_icons_dir(),
            local_docs_dir: None,
            code_root: default_code_root(),
            code_excerpt_chars: default_code_excerpt_chars(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_tools() -> usize {
    3
}

fn default_icons_dir() -> PathBuf {
    PathBuf::from("icons")
}

fn default_code_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_code_excerpt_chars() -> usize {
    4000
}

/// [tools.search] 段：arXiv 与维基百科端点、结果数上限
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_arxiv_endpoint")]
    pub arxiv_endpoint: String,
    #[serde(default = "default_wikipedia_endpoint")]
    pub wikipedia_endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// 摘要截断字符数（控制 prompt 体积）
    #[serde(default = "default_max_summary_chars")]
    pub max_summary_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            arxiv_endpoint: default_arxiv_endpoint(),
            wikipedia_endpoint: default_wikipedia_endpoint(),
            max_results: default_max_results(),
            max_summary_chars: default_max_summary_chars(),
        }
    }
}

fn default_arxiv_endpoint() -> String {
    "http://export.arxiv.org/api/query".to_string()
}

fn default_wikipedia_endpoint() -> String {
    "https://en.wikipedia.org/api/rest_v1/page/summary".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_max_summary_chars() -> usize {
    1200
}

/// [pipeline] 段：各阶段重试预算、单次调用超时、同步阈值
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_research_retries")]
    pub max_research_retries: u32,
    #[serde(default = "default_max_codegen_retries")]
    pub max_codegen_retries: u32,
    /// 一个 run 最多容忍的编译错误次数，达到即放弃
    #[serde(default = "default_render_retry_budget")]
    pub render_retry_budget: u32,
    /// ResearchAgent 内部自我修订次数
    #[serde(default = "default_self_revisions")]
    pub research_self_revisions: u32,
    #[serde(default = "default_research_timeout_secs")]
    pub research_timeout_secs: u64,
    #[serde(default = "default_codegen_timeout_secs")]
    pub codegen_timeout_secs: u64,
    /// 旁白无画面覆盖的最长间隙（秒）
    #[serde(default = "default_max_narration_gap_secs")]
    pub max_narration_gap_secs: f64,
    /// 旁白时长估算用语速
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: f64,
    /// 校验时是否要求每个 Section 至少一个 Visual Cue
    #[serde(default = "default_require_section_cues")]
    pub require_section_cues: bool,
    /// 渲染队列已满时的退避间隔（毫秒）
    #[serde(default = "default_admission_backoff_ms")]
    pub admission_backoff_ms: u64,
    /// 并发 run 提交队列容量
    #[serde(default = "default_run_queue_capacity")]
    pub run_queue_capacity: usize,
    /// 同时执行的 run 数
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_research_retries: default_max_research_retries(),
            max_codegen_retries: default_max_codegen_retries(),
            render_retry_budget: default_render_retry_budget(),
            research_self_revisions: default_self_revisions(),
            research_timeout_secs: default_research_timeout_secs(),
            codegen_timeout_secs: default_codegen_timeout_secs(),
            max_narration_gap_secs: default_max_narration_gap_secs(),
            words_per_minute: default_words_per_minute(),
            require_section_cues: default_require_section_cues(),
            admission_backoff_ms: default_admission_backoff_ms(),
            run_queue_capacity: default_run_queue_capacity(),
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

fn default_max_research_retries() -> u32 {
    2
}

fn default_max_codegen_retries() -> u32 {
    2
}

fn default_render_retry_budget() -> u32 {
    2
}

fn default_self_revisions() -> u32 {
    1
}

fn default_research_timeout_secs() -> u64 {
    300
}

fn default_codegen_timeout_secs() -> u64 {
    300
}

fn default_max_narration_gap_secs() -> f64 {
    2.0
}

fn default_words_per_minute() -> f64 {
    150.0
}

fn default_require_section_cues() -> bool {
    true
}

fn default_admission_backoff_ms() -> u64 {
    500
}

fn default_run_queue_capacity() -> usize {
    16
}

fn default_max_concurrent_runs() -> usize {
    4
}

impl PipelineSection {
    pub fn research_timeout(&self) -> Duration {
        Duration::from_secs(self.research_timeout_secs)
    }

    pub fn codegen_timeout(&self) -> Duration {
        Duration::from_secs(self.codegen_timeout_secs)
    }
}

/// [render] 段：Manim 命令、画质、超时、准入控制、场景生成方式
#[derive(Debug, Clone, Deserialize)]
pub struct RenderSection {
    /// 渲染器可执行文件
    #[serde(default = "default_render_command")]
    pub command: String,
    /// l / m / h / k（对应 manim -ql / -qm / -qh / -qk）
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
    /// 同时渲染的场景数
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent: usize,
    /// 等待渲染槽位的 run 上限，超出即背压
    #[serde(default = "default_render_queue_capacity")]
    pub queue_capacity: usize,
    /// 是否按场景代码哈希缓存成功的渲染结果
    #[serde(default = "default_cache_enabled")]
    pub cache: bool,
    /// 场景生成器能渲染的 cue 类型
    #[serde(default = "default_supported_cues")]
    pub supported_cues: Vec<CueKind>,
    /// llm / template
    #[serde(default = "default_codegen_mode")]
    pub codegen_mode: String,
    /// 渲染工作目录（场景文件与 media 输出）
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            command: default_render_command(),
            quality: default_quality(),
            timeout_secs: default_render_timeout_secs(),
            max_concurrent: default_max_concurrent_renders(),
            queue_capacity: default_render_queue_capacity(),
            cache: default_cache_enabled(),
            supported_cues: default_supported_cues(),
            codegen_mode: default_codegen_mode(),
            work_dir: default_work_dir(),
        }
    }
}

fn default_render_command() -> String {
    "manim".to_string()
}

fn default_quality() -> String {
    "m".to_string()
}

fn default_render_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent_renders() -> usize {
    2
}

fn default_render_queue_capacity() -> usize {
    8
}

fn default_cache_enabled() -> bool {
    true
}

fn default_supported_cues() -> Vec<CueKind> {
    vec![
        CueKind::Equation,
        CueKind::Diagram,
        CueKind::Icon,
        CueKind::Transition,
    ]
}

fn default_codegen_mode() -> String {
    "llm".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("media")
}

/// 从 config 目录加载配置，环境变量 VISO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 VISO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("VISO")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
