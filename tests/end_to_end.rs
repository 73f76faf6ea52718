//! 端到端测试：真实 ResearchAgent（Mock LLM + 替身检索）→ 模板场景 → 替身渲染；提交队列背压

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use visocode::config::AppConfig;
    use visocode::core::{FailureClass, PipelineBuilder, RunOutcome, RunQueue, Stage, SubmitError};
    use visocode::llm::MockLlmClient;
    use visocode::tools::{
        Calculator, DocumentSummary, IconLibrary, SearchAdapter, ToolError, ToolExecutor, Toolbox,
    };

    use crate::common::*;

    struct ChainRuleSearch;

    #[async_trait]
    impl SearchAdapter for ChainRuleSearch {
        fn name(&self) -> &str {
            "wikipedia"
        }

        async fn search(&self, _query: &str) -> Result<Vec<DocumentSummary>, ToolError> {
            Ok(vec![DocumentSummary {
                id: "https://en.wikipedia.org/wiki/Chain_rule".into(),
                title: "Chain rule".into(),
                summary: "The chain rule expresses the derivative of a composition.".into(),
                url: "https://en.wikipedia.org/wiki/Chain_rule".into(),
                authors: vec![],
            }])
        }
    }

    const DRAFT: &str = r#"Here is the document:
```json
{"question":"chain rule","sections":[
  {"id":"s1","title":"Composition","narration":"We nest one function inside another, writing $f(g(x))$.",
   "cues":[{"id":"c1","kind":"equation","payload":"y = f(g(x))"},{"id":"c2","kind":"icon","payload":"Gear"}],
   "references":[{"source":"S1","locator":""}]},
  {"id":"s2","title":"Rates multiply","narration":"The outer rate times the inner rate gives the total rate.",
   "cues":[{"id":"c3","kind":"equation","payload":"\\frac{dy}{dx} = f'(g(x)) g'(x)"}],
   "references":[{"source":"https://en.wikipedia.org/wiki/Chain_rule","locator":"Statement"}]},
  {"id":"s3","title":"Example","narration":"For sine of x squared we get two x cosine of x squared.",
   "cues":[{"id":"c4","kind":"diagram","payload":"plot of sin(x^2) with its derivative"}],
   "references":[{"source":"S1","locator":"Examples"}]}
]}
```"#;

    fn toolbox() -> Arc<Toolbox> {
        Arc::new(Toolbox::new(
            ToolExecutor::new(2, 5),
            vec![Arc::new(ChainRuleSearch)],
            Arc::new(Calculator),
            Arc::new(IconLibrary::from_entries([("gear", "icons/gear.png")])),
        ))
    }

    #[tokio::test]
    async fn test_full_stack_with_template_scene() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.app.output_dir = tmp.path().to_path_buf();
        config.render.codegen_mode = "template".into();

        let llm = Arc::new(MockLlmClient::with_replies([DRAFT]));
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = PipelineBuilder::new(config)
            .with_llm(llm.clone())
            .with_toolbox(toolbox())
            .with_renderer(renderer.clone())
            .build();

        let report = orch
            .run("What is the chain rule in calculus?", CancellationToken::new())
            .await;

        assert_eq!(report.stage, Stage::Succeeded, "history: {:?}", report.history);
        assert_eq!(llm.call_count().await, 1);
        assert_eq!(renderer.calls(), 1);

        let document = report.run.artifacts.document.as_ref().unwrap();
        assert_eq!(document.sections[1].references[0].source, "S1");
        assert_eq!(document.sections[0].cues[1].payload, "gear");

        let scene = report.run.artifacts.scene.as_ref().unwrap();
        assert!(scene.code.contains("ImageMobject(\"icons/gear.png\")"));
        assert_eq!(scene.markers("section"), vec!["s1", "s2", "s3"]);

        let dir = tmp.path().join(report.run_id.as_str());
        assert!(dir.join("scene.py").is_file());
        assert!(dir.join("subtitles.srt").is_file());
        match report.outcome {
            RunOutcome::Succeeded { subtitles, .. } => {
                assert_eq!(subtitles, Some(dir.join("subtitles.srt")))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unintelligible_question_is_abandoned_without_llm() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.app.output_dir = tmp.path().to_path_buf();
        let llm = Arc::new(MockLlmClient::new());
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = PipelineBuilder::new(config)
            .with_llm(llm.clone())
            .with_toolbox(toolbox())
            .with_renderer(renderer.clone())
            .build();

        let report = orch.run("??", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(report.invocations.research, 1);
        assert_eq!(llm.call_count().await, 0);
        assert_eq!(renderer.calls(), 0);
    }

    #[tokio::test]
    async fn test_run_queue_rejects_when_full() {
        let orch = Arc::new(orchestrator(
            Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())])),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding().with_delay(Duration::from_millis(300))),
        ));
        let queue = RunQueue::start(orch, 1, 1);

        let first = queue.try_submit("What is the chain rule? (1)").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = queue.try_submit("What is the chain rule? (2)").unwrap();
        assert_eq!(
            queue.try_submit("What is the chain rule? (3)").err(),
            Some(SubmitError::Busy)
        );

        assert_eq!(first.wait().await.unwrap().stage, Stage::Succeeded);
        assert_eq!(second.wait().await.unwrap().stage, Stage::Succeeded);
    }

    #[tokio::test]
    async fn test_run_queue_shutdown_cancels_running() {
        let orch = Arc::new(orchestrator(
            Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]).with_slow_calls(1)),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        ));
        let queue = RunQueue::start(orch, 4, 2);
        let ticket = queue.try_submit("What is the chain rule?").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shutdown();

        let report = ticket.wait().await.unwrap();
        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(report.history.last().unwrap().class, FailureClass::Cancelled);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.try_submit("late").err(), Some(SubmitError::Closed));
    }
}
