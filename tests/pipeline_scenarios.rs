//! 流水线集成测试：状态机路由、重试预算、取消、恢复

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use tokio_util::sync::CancellationToken;

    use visocode::core::{
        CodeGenFailure, FailureClass, PipelineRun, ResearchFailure, RunOutcome, Stage,
    };
    use visocode::render::{CachedRenderer, RenderPool, RenderResult};
    use visocode::schema::{coverage, Coverage};
    use visocode::store::RunStore;

    use crate::common::*;

    fn classes(report: &visocode::RunReport) -> Vec<FailureClass> {
        report.history.iter().map(|e| e.class).collect()
    }

    #[tokio::test]
    async fn test_scenario_a_chain_rule_succeeds() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::new());
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = orchestrator(researcher.clone(), generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert!(report.is_success());
        assert!(report.history.is_empty());
        assert_eq!(researcher.calls(), 1);
        assert_eq!(generator.calls(), 1);
        assert_eq!(renderer.calls(), 1);

        let manifest = report.run.artifacts.manifest.as_ref().unwrap();
        let document = report.run.artifacts.document.as_ref().unwrap();
        assert_eq!(document.sections.len(), 3);
        assert_eq!(coverage(manifest, document), Coverage::Complete);
    }

    #[tokio::test]
    async fn test_scenario_b_missing_reference_retries_research_once() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![
            Ok(document_missing_reference_in_section_2()),
            Ok(chain_rule_document()),
        ]));
        let orch = orchestrator(
            researcher.clone(),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        );

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(researcher.calls(), 2);
        assert_eq!(report.counters.research_retries, 1);
        assert_eq!(report.history.len(), 1);
        assert_eq!(report.history[0].stage, Stage::ResearchPending);
        assert_eq!(report.history[0].class, FailureClass::ValidationFailure);
        assert!(report.history[0].message.contains("sections[1]: section has no references"));

        let feedback = researcher.feedback.lock().await;
        assert!(feedback[0].is_empty());
        assert_eq!(feedback[1], vec!["sections[1]: section has no references".to_string()]);
    }

    #[tokio::test]
    async fn test_scenario_c_two_compile_errors_exhaust_render_budget() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::new());
        let renderer = Arc::new(ScriptedRenderer::new(vec![
            RenderResult::CompileError("NameError: name 'Foo' is not defined".into()),
            RenderResult::CompileError("TypeError: bad operand".into()),
        ]));
        let orch = orchestrator(researcher.clone(), generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(
            classes(&report),
            vec![
                FailureClass::RenderFailure,
                FailureClass::RenderFailure,
                FailureClass::BudgetExhausted
            ]
        );
        assert!(report.history[0].message.contains("NameError"));
        assert!(report.history[1].message.contains("TypeError"));
        assert_eq!(renderer.calls(), 2);
        assert_eq!(generator.calls(), 2);
        assert_eq!(researcher.calls(), 1);
        assert_eq!(report.counters.compile_errors, 2);
        match &report.outcome {
            RunOutcome::Abandoned { class, reason } => {
                assert_eq!(*class, FailureClass::BudgetExhausted);
                assert!(reason.contains("render retry budget (2) exhausted"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_compile_error_routes_to_codegen_with_diagnostics() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::new());
        let renderer = Arc::new(ScriptedRenderer::new(vec![RenderResult::CompileError(
            "NameError: name 'Foo' is not defined".into(),
        )]));
        let orch = orchestrator(researcher.clone(), generator.clone(), renderer.clone())
            .with_budgets(budgets(2, 2, 3));

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(researcher.calls(), 1);
        assert_eq!(generator.calls(), 2);
        assert_eq!(report.history[0].stage, Stage::Rendering);
        assert_eq!(report.counters.codegen_retries, 0);
        let feedback = generator.feedback.lock().await;
        assert!(feedback[1][0].starts_with("scene code failed to compile"));
        assert!(feedback[1][0].contains("NameError"));
    }

    #[tokio::test]
    async fn test_codegen_failures_retry_with_feedback() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::failing(vec![
            CodeGenFailure::UnsupportedCueType {
                cue_id: "c2".into(),
                kind: visocode::schema::CueKind::Diagram,
            },
            CodeGenFailure::ManifestIncomplete(vec!["segment 's3' has no cue coverage".into()]),
        ]));
        let orch = orchestrator(
            researcher.clone(),
            generator.clone(),
            Arc::new(ScriptedRenderer::succeeding()),
        );

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(generator.calls(), 3);
        assert_eq!(researcher.calls(), 1);
        assert_eq!(report.counters.codegen_retries, 2);
        let feedback = generator.feedback.lock().await;
        assert!(feedback[1][0].contains("cue 'c2' of kind diagram"));
        assert_eq!(feedback[2], vec!["sync manifest: segment 's3' has no cue coverage".to_string()]);
    }

    #[tokio::test]
    async fn test_uncovered_manifest_is_sent_back_to_codegen() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::with_hollow_manifests(1));
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = orchestrator(researcher.clone(), generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(generator.calls(), 2);
        assert_eq!(renderer.calls(), 1);
        assert_eq!(report.counters.codegen_retries, 1);
        assert_eq!(classes(&report), vec![FailureClass::ValidationFailure]);
        let feedback = generator.feedback.lock().await;
        assert!(feedback[1].iter().any(|f| f.contains("segment 's1' has no cue coverage")));
        assert!(feedback[1].iter().any(|f| f.contains("segment 's3' has no cue coverage")));
    }

    #[tokio::test]
    async fn test_uncovered_manifest_never_reaches_renderer() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::with_hollow_manifests(u32::MAX));
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = orchestrator(researcher, generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(generator.calls(), 3);
        assert_eq!(renderer.calls(), 0);
        assert_eq!(classes(&report).last(), Some(&FailureClass::BudgetExhausted));
    }

    #[tokio::test]
    async fn test_research_never_exceeds_budget() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(
            document_missing_reference_in_section_2(),
        )]));
        let generator = Arc::new(RecordingGenerator::new());
        let orch = orchestrator(
            researcher.clone(),
            generator.clone(),
            Arc::new(ScriptedRenderer::succeeding()),
        );

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(researcher.calls(), 3);
        assert_eq!(report.invocations.research, 3);
        assert_eq!(generator.calls(), 0);
        assert_eq!(classes(&report).last(), Some(&FailureClass::BudgetExhausted));
        assert_eq!(report.history.len(), 4);
    }

    #[tokio::test]
    async fn test_codegen_never_exceeds_budget() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::always_failing());
        let renderer = Arc::new(ScriptedRenderer::succeeding());
        let orch = orchestrator(researcher.clone(), generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(generator.calls(), 3);
        assert_eq!(renderer.calls(), 0);
        assert_eq!(classes(&report).last(), Some(&FailureClass::BudgetExhausted));
    }

    #[tokio::test]
    async fn test_no_viable_explanation_is_terminal() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Err(
            ResearchFailure::NoViableExplanation("question is not intelligible".into()),
        )]));
        let orch = orchestrator(
            researcher.clone(),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        );

        let report = orch.run("qzxv", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(researcher.calls(), 1);
        assert_eq!(classes(&report), vec![FailureClass::ValidationFailure]);
    }

    #[tokio::test]
    async fn test_tool_unavailable_is_retried() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![
            Err(ResearchFailure::ToolUnavailable("arxiv offline".into())),
            Ok(chain_rule_document()),
        ]));
        let orch = orchestrator(
            researcher.clone(),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        );

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(classes(&report), vec![FailureClass::ToolFailure]);
    }

    #[tokio::test]
    async fn test_render_timeout_abandons() {
        let researcher = Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())]));
        let generator = Arc::new(RecordingGenerator::new());
        let renderer = Arc::new(ScriptedRenderer::new(vec![RenderResult::Timeout]));
        let orch = orchestrator(researcher, generator.clone(), renderer.clone());

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(renderer.calls(), 1);
        assert_eq!(generator.calls(), 1);
        assert_eq!(classes(&report), vec![FailureClass::RenderFailure]);
    }

    #[tokio::test]
    async fn test_research_timeout_is_recoverable() {
        let researcher = Arc::new(
            ScriptedResearcher::new(vec![Ok(chain_rule_document())]).with_slow_calls(1),
        );
        let mut timeouts = short_timeouts();
        timeouts.research = Duration::from_millis(100);
        let orch = orchestrator(
            researcher.clone(),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        )
        .with_timeouts(timeouts);

        let report = orch.run("What is the chain rule?", CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(researcher.calls(), 2);
        assert_eq!(report.history[0].message, "research call timed out");
    }

    #[tokio::test]
    async fn test_cancellation_abandons_promptly() {
        let researcher = Arc::new(
            ScriptedResearcher::new(vec![Ok(chain_rule_document())]).with_slow_calls(1),
        );
        let orch = orchestrator(
            researcher,
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = orch.run("What is the chain rule?", cancel).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.stage, Stage::Abandoned);
        assert_eq!(classes(&report), vec![FailureClass::Cancelled]);
    }

    #[tokio::test]
    async fn test_identical_scene_renders_identically() {
        let renderer = Arc::new(CachedRenderer::new(ScriptedRenderer::succeeding()));
        let orch = orchestrator(
            Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())])),
            Arc::new(RecordingGenerator::new()),
            renderer.clone(),
        );

        let first = orch.run("What is the chain rule?", CancellationToken::new()).await;
        let second = orch.run("What is the chain rule?", CancellationToken::new()).await;

        let (RunOutcome::Succeeded { video: a, .. }, RunOutcome::Succeeded { video: b, .. }) =
            (&first.outcome, &second.outcome)
        else {
            panic!("both runs should succeed");
        };
        assert_eq!(a.duration_secs, b.duration_secs);
        assert_eq!(a.path, b.path);
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(renderer.inner().calls(), 1);
    }

    #[tokio::test]
    async fn test_shared_render_pool_applies_backpressure() {
        let renderer = Arc::new(ScriptedRenderer::succeeding().with_delay(Duration::from_millis(150)));
        let pool = Arc::new(RenderPool::new(1, 0));
        let orch = Arc::new(
            orchestrator(
                Arc::new(ScriptedResearcher::new(vec![Ok(chain_rule_document())])),
                Arc::new(RecordingGenerator::new()),
                renderer.clone(),
            )
            .with_render_pool(pool),
        );

        let runs: Vec<_> = (0..3)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    orch.run(&format!("What is the chain rule? #{i}"), CancellationToken::new())
                        .await
                })
            })
            .collect();
        for run in runs {
            let report = run.await.unwrap();
            assert_eq!(report.stage, Stage::Succeeded);
            assert!(report.history.is_empty());
        }
        assert_eq!(renderer.calls(), 3);
        assert_eq!(renderer.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persisted_artifacts_and_resume() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RunStore::new(tmp.path());

        // 研究已完成并持久化的 run
        let mut run = PipelineRun::new("What is the chain rule?");
        run.artifacts.document = Some(chain_rule_document());
        run.transition(Stage::ResearchValidated).unwrap();
        store.save(&run).await.unwrap();

        let loaded = store.load(run.run_id.as_str()).await.unwrap();
        assert_eq!(loaded.stage, Stage::ResearchValidated);

        let researcher = Arc::new(ScriptedResearcher::new(vec![]));
        let orch = orchestrator(
            researcher.clone(),
            Arc::new(RecordingGenerator::new()),
            Arc::new(ScriptedRenderer::succeeding()),
        )
        .with_store(store.clone());

        let report = orch.resume(loaded, CancellationToken::new()).await;

        assert_eq!(report.stage, Stage::Succeeded);
        assert_eq!(researcher.calls(), 0);

        let dir = store.run_dir(&report.run_id);
        for file in ["run.json", "explanation.json", "scene.py", "manifest.json", "history.json", "subtitles.srt"] {
            assert!(dir.join(file).is_file(), "{file} missing");
        }
        let srt = std::fs::read_to_string(dir.join("subtitles.srt")).unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:05,000\n"));
        assert!(srt.contains("$f(g(x))$"));

        let reloaded = store.load(report.run_id.as_str()).await.unwrap();
        assert_eq!(reloaded.stage, Stage::Succeeded);
        assert!(reloaded.artifacts.subtitles.is_some());
    }
}
