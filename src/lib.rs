//! VisoCode - 问题 → 研究 → 场景代码 → 渲染 的解说视频流水线
//!
//! 模块划分：
//! - **agents**: ResearchAgent、CodeAgent、TemplateSceneWriter 与研究规划
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 状态机、错误分类与恢复、Orchestrator、提交队列、装配、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **render**: 渲染端抽象、Manim 渲染、缓存、准入控制、字幕
//! - **schema**: Explanation Document、校验器、Sync Manifest、Scene Code
//! - **store**: run 快照与产物持久化
//! - **tools**: 文献检索、数值计算、图标查找与执行器

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod render;
pub mod schema;
pub mod store;
pub mod tools;

pub use crate::core::{Orchestrator, PipelineBuilder, RunOutcome, RunReport};
