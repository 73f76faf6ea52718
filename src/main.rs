//! VisoCode 命令行入口
//!
//! 运行一条流水线，把 run 报告以 JSON 打印到 stdout；run 被放弃时以非零码退出。

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use visocode::core::{create_pipeline_builder, ShutdownManager};

#[derive(Debug, Parser)]
#[command(name = "visocode", version, about = "问题 → 解说视频")]
struct Cli {
    /// 配置文件（缺省读取 config/default.toml）
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 从已持久化的 run 继续
    #[arg(short, long, value_name = "RUN_ID")]
    resume: Option<String>,

    /// 要解释的问题
    #[arg(trailing_var_arg = true)]
    question: Vec<String>,
}

impl Cli {
    fn question(&self) -> String {
        self.question.join(" ").trim().to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let question = cli.question();
    if question.is_empty() && cli.resume.is_none() {
        bail!("a question is required unless --resume is given");
    }

    visocode::observability::init();

    let builder = create_pipeline_builder(cli.config);
    let orchestrator = builder.build();

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    let report = match cli.resume {
        Some(run_id) => {
            let store = orchestrator.store().context("run store not configured")?;
            let run = store
                .load(&run_id)
                .await
                .with_context(|| format!("Failed to load run {run_id}"))?;
            orchestrator.resume(run, shutdown.run_token()).await
        }
        None => orchestrator.run(&question, shutdown.run_token()).await,
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize run report")?
    );

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_words_are_joined() {
        let cli = Cli::try_parse_from(["visocode", "explain", "the", "chain", "rule"]).unwrap();
        assert_eq!(cli.question(), "explain the chain rule");
        assert!(cli.config.is_none());
        assert!(cli.resume.is_none());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(["visocode", "-c", "my.toml", "--resume", "abc123"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
        assert_eq!(cli.resume.as_deref(), Some("abc123"));
        assert_eq!(cli.question(), "");
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["visocode", "--confg", "x", "why"]).is_err());
    }
}
