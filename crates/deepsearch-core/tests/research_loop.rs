mod common;

use std::sync::{Arc, Mutex};

use common::{
    MockFetcher, MockSearch, ScriptedOracle, answer_decision, continue_decision, hit, plan,
    services,
};
use deepsearch_core::{
    ActionDecision, AnswerRelevancyScorer, ConversationMessage, DatasetRunner, EvalCase,
    EvaluationHarness, EventCollector, ProgressAnnotation, ResearchError, SessionOptions,
    StreamChunk, Usage, UserLocation, ask_deep_search, run_research_session,
};
use futures::StreamExt;
use tempfile::TempDir;

const PARIS_SUMMARY: &str = "Paris is the capital of France [Source](http://s.test).";

#[tokio::test]
async fn answers_immediately_with_citation_intact() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_plan(plan(&["capital of France"]))
            .with_decision(answer_decision())
            .with_summary(PARIS_SUMMARY)
            .with_answer_chunks(&[
                "Paris is the capital of France ",
                "[Sou",
                "rce](http://s",
                ".test).",
            ]),
    );
    let search = Arc::new(MockSearch::returning(vec![hit("Source", "http://s.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let mut session = run_research_session(
        &services,
        SessionOptions::new(vec![ConversationMessage::user(
            "What's the capital of France?",
        )]),
    )
    .await
    .expect("session should start answering");

    assert!(!session.is_final);
    assert_eq!(session.steps, 1);
    assert_eq!(session.sources, vec!["http://s.test".to_string()]);

    let mut deltas = Vec::new();
    while let Some(chunk) = session.stream.next().await {
        if let StreamChunk::Delta(text) = chunk.unwrap() {
            deltas.push(text);
        }
    }
    let answer = deltas.concat();

    assert!(answer.contains("[Source](http://s.test)"));
    assert!(deltas.iter().any(|delta| delta.contains("[Source](http://s.test)")));
    assert!(!answer.contains("plan"));
    assert!(!answer.contains("workflow"));

    let requests = oracle.answer_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].prompt.contains(PARIS_SUMMARY));
    assert!(requests[0].prompt.contains("USER: What's the capital of France?"));
    assert_eq!(oracle.calls("query_plan"), 1);
    assert_eq!(oracle.calls("next_action"), 1);
}

#[tokio::test]
async fn exhausted_budget_forces_final_answer() {
    let oracle = Arc::new(ScriptedOracle::new().with_default_decision(continue_decision()));
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let outcome = run_research_session(
        &services,
        SessionOptions::question("Compare rail fares across Europe").with_max_steps(2),
    )
    .await
    .unwrap()
    .collect()
    .await
    .unwrap();

    assert!(outcome.is_final);
    assert_eq!(outcome.steps, 2);
    assert_eq!(oracle.calls("query_plan"), 2);
    assert_eq!(oracle.calls("next_action"), 1);
    assert_eq!(oracle.calls("answer"), 1);

    let system = oracle.answer_requests()[0].system.clone().unwrap();
    assert!(system.contains("limitations"));
    assert!(system.contains("Citation is non-negotiable"));
}

#[tokio::test]
async fn planning_cycles_never_exceed_budget() {
    for budget in 1..=4u32 {
        let oracle = Arc::new(ScriptedOracle::new().with_default_decision(continue_decision()));
        let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
        let fetcher = Arc::new(MockFetcher::default());
        let services = services(&oracle, &search, &fetcher);

        let session = run_research_session(
            &services,
            SessionOptions::question("q").with_max_steps(budget),
        )
        .await
        .unwrap();

        assert_eq!(session.steps, budget);
        assert!(session.is_final);
        assert_eq!(oracle.calls("query_plan"), budget as usize);
        assert_eq!(oracle.calls("next_action"), budget as usize - 1);
    }
}

#[tokio::test]
async fn rounds_are_recorded_in_plan_order() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_plan(plan(&["first query", "second query", "third query"]))
            .with_decision(answer_decision()),
    );
    let search = Arc::new(
        MockSearch::default()
            .with_response("first query", vec![hit("One", "https://one.test")])
            .with_response("second query", vec![])
            .with_response("third query", vec![hit("Three", "https://three.test")]),
    );
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    run_research_session(&services, SessionOptions::question("q"))
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();

    let prompt = oracle.answer_requests()[0].prompt.clone();
    let first = prompt.find("## Query: \"first query\"").unwrap();
    let second = prompt.find("## Query: \"second query\"").unwrap();
    let third = prompt.find("## Query: \"third query\"").unwrap();
    assert!(first < second && second < third);
    assert!(prompt.contains("No results found"));
    assert_eq!(search.calls(), 3);
}

#[tokio::test]
async fn schema_violation_from_planner_aborts_session() {
    let oracle = Arc::new(ScriptedOracle::new().with_plan(plan(&[])));
    let search = Arc::new(MockSearch::default());
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let result = run_research_session(&services, SessionOptions::question("q")).await;

    match result {
        Err(ResearchError::SchemaViolation { schema, .. }) => assert_eq!(schema, "query_plan"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("planner violation should abort the loop"),
    }
    assert_eq!(search.calls(), 0);
    assert_eq!(oracle.calls("answer"), 0);
}

#[tokio::test]
async fn malformed_decision_aborts_session() {
    let oracle = Arc::new(
        ScriptedOracle::new().with_decision(serde_json::json!({"type": "search", "title": "t"})),
    );
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let result = run_research_session(&services, SessionOptions::question("q")).await;
    assert!(matches!(result, Err(ResearchError::SchemaViolation { .. })));
    assert_eq!(oracle.calls("query_plan"), 1);
}

#[tokio::test]
async fn conversation_without_user_message_is_rejected() {
    let oracle = Arc::new(ScriptedOracle::new());
    let search = Arc::new(MockSearch::default());
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let result = run_research_session(
        &services,
        SessionOptions::new(vec![ConversationMessage::assistant("hello")]),
    )
    .await;
    assert!(matches!(result, Err(ResearchError::InvalidConfiguration(_))));
    assert_eq!(oracle.calls("query_plan"), 0);
}

#[tokio::test]
async fn zero_step_budget_is_rejected_before_planning() {
    let oracle = Arc::new(ScriptedOracle::new());
    let search = Arc::new(MockSearch::default());
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let options = SessionOptions::question("q").with_max_steps(0);
    let result = run_research_session(&services, options).await;
    assert!(matches!(result, Err(ResearchError::InvalidConfiguration(_))));
    assert_eq!(oracle.calls("query_plan"), 0);
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn progress_annotations_precede_each_transition() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_plan(plan(&["background"]))
            .with_plan(plan(&["details", "more details"]))
            .with_decision(continue_decision())
            .with_decision(answer_decision()),
    );
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let (collector, mut receiver) = EventCollector::new();
    let outcome = run_research_session(
        &services,
        SessionOptions::question("q").with_progress(Arc::new(collector)),
    )
    .await
    .unwrap()
    .collect()
    .await
    .unwrap();

    let mut annotations: Vec<ProgressAnnotation> = Vec::new();
    while let Ok(annotation) = receiver.try_recv() {
        annotations.push(annotation);
    }

    assert_eq!(annotations.len(), 3);
    assert_eq!(annotations[0].plan().unwrap().queries, vec!["background"]);
    assert!(matches!(annotations[1].action(), ActionDecision::Continue { .. }));
    assert_eq!(annotations[1].plan().unwrap().queries.len(), 2);
    assert!(annotations[2].action().is_answer());
    assert!(annotations[2].plan().is_none());

    assert_eq!(outcome.trace.steps.len(), 3);
    assert_eq!(outcome.steps, 2);
}

#[tokio::test]
async fn on_finish_hook_fires_once_with_full_text() {
    let oracle = Arc::new(ScriptedOracle::new().with_answer_chunks(&["Done ", "**now**", "."]));
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let finished = Arc::new(Mutex::new(Vec::new()));
    let sink = finished.clone();
    let outcome = run_research_session(
        &services,
        SessionOptions::question("q").with_on_finish(Box::new(move |text: String, usage: Usage| {
            sink.lock().unwrap().push((text, usage.total_tokens));
        })),
    )
    .await
    .unwrap()
    .collect()
    .await
    .unwrap();

    assert_eq!(outcome.answer, "Done **now**.");
    assert_eq!(outcome.usage.total_tokens, 120);
    assert_eq!(
        *finished.lock().unwrap(),
        vec![("Done **now**.".to_string(), 120)]
    );
}

#[tokio::test]
async fn location_hint_reaches_prompts() {
    let oracle = Arc::new(ScriptedOracle::new());
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    run_research_session(
        &services,
        SessionOptions::question("Best bakery nearby?")
            .with_location(UserLocation::city_country("Lyon", "FR")),
    )
    .await
    .unwrap()
    .collect()
    .await
    .unwrap();

    assert!(
        oracle.answer_requests()[0]
            .prompt
            .contains("USER LOCATION: Lyon, FR")
    );
}

#[tokio::test]
async fn sessions_are_logged_traced_and_evaluated() {
    let logs = TempDir::new().unwrap();
    let traces = TempDir::new().unwrap();

    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_summary(PARIS_SUMMARY)
            .with_answer_chunks(&["Paris ", "[Source](http://s.test)."]),
    );
    let search = Arc::new(MockSearch::returning(vec![hit("Source", "http://s.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher).with_session_log_dir(logs.path());

    let outcome = run_research_session(
        &services,
        SessionOptions::question("capital of France?")
            .with_session_id("session-paris")
            .with_trace_dir(traces.path()),
    )
    .await
    .unwrap()
    .collect()
    .await
    .unwrap();

    let trace_path = outcome.trace_path.expect("trace persisted");
    assert_eq!(trace_path, traces.path().join("session-paris.json"));
    assert!(trace_path.exists());

    let log_path = outcome.log_path.expect("session logged");
    let metrics = EvaluationHarness::analyze_log(&log_path).unwrap();
    assert_eq!(metrics.total_sessions, 1);
    assert_eq!(metrics.forced_answers, 0);
    assert!(metrics.uncited.is_empty());
    assert!((metrics.average_steps - 1.0).abs() < f32::EPSILON);

    let removed =
        deepsearch_core::remove_session_logs("session-paris", Some(logs.path())).unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn ask_deep_search_returns_answer_text() {
    let oracle = Arc::new(ScriptedOracle::new().with_answer_chunks(&["All ", "good."]));
    let search = Arc::new(MockSearch::returning(vec![hit("A", "https://a.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let answer = ask_deep_search(&services, vec![ConversationMessage::user("status?")])
        .await
        .unwrap();
    assert_eq!(answer, "All good.");
}

#[tokio::test]
async fn dataset_runner_scores_each_case() {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .with_answer_chunks(&["Paris ", "[Source](http://s.test)."])
            .with_judgement(
                serde_json::json!({"statements": ["Paris is the capital.", "It has museums."]}),
                serde_json::json!({"verdicts": [
                    {"verdict": "yes", "reason": "Direct answer."},
                    {"verdict": "unsure", "reason": "Related."}
                ]}),
            ),
    );
    let search = Arc::new(MockSearch::returning(vec![hit("Source", "http://s.test")]));
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let cases = vec![
        EvalCase {
            id: "1".into(),
            question: "capital of France?".into(),
            expected: Some("Paris".into()),
        },
        EvalCase {
            id: "2".into(),
            question: "largest French city?".into(),
            expected: None,
        },
    ];
    let report = DatasetRunner::new(&services)
        .with_scorer(AnswerRelevancyScorer::new(services.oracle().clone()))
        .run(&cases)
        .await;

    assert_eq!(report.cases.len(), 2);
    assert!(report.cases.iter().all(|case| case.contains_links));
    assert_eq!(report.cases[0].answer, "Paris [Source](http://s.test).");
    assert_eq!(report.mean_relevancy(), Some(0.75));
    assert_eq!(report.failures(), 0);
    assert_eq!(oracle.calls("answer_statements"), 2);
    assert_eq!(oracle.calls("relevancy_verdicts"), 2);
}

#[tokio::test]
async fn dataset_runner_records_failed_cases() {
    let oracle = Arc::new(ScriptedOracle::new().with_default_plan(serde_json::json!({
        "plan": "nothing",
        "queries": []
    })));
    let search = Arc::new(MockSearch::default());
    let fetcher = Arc::new(MockFetcher::default());
    let services = services(&oracle, &search, &fetcher);

    let cases = vec![EvalCase {
        id: "broken".into(),
        question: "q".into(),
        expected: None,
    }];
    let report = DatasetRunner::new(&services).run(&cases).await;

    assert_eq!(report.failures(), 1);
    assert!(report.cases[0].error.as_deref().unwrap().contains("query_plan"));
    assert_eq!(report.mean_relevancy(), None);
    assert_eq!(report.link_rate(), 0.0);
}
