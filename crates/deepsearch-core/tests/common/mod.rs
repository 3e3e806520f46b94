#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deepsearch_core::providers::{FetchOutcome, PageFetcher, SearchHit, WebSearch};
use deepsearch_core::{
    Oracle, OracleRequest, OutputSchema, ResearchError, ResearchServices, Result, StreamChunk,
    TextStream, Usage,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Oracle that replays scripted structured outputs and streams fixed answer chunks.
pub struct ScriptedOracle {
    plans: Mutex<VecDeque<Value>>,
    default_plan: Value,
    decisions: Mutex<VecDeque<Value>>,
    default_decision: Value,
    summary: String,
    answer_chunks: Vec<String>,
    judge_statements: Value,
    judge_verdicts: Value,
    calls: Mutex<HashMap<String, usize>>,
    answer_requests: Mutex<Vec<OracleRequest>>,
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self {
            plans: Mutex::new(VecDeque::new()),
            default_plan: plan(&["capital of France"]),
            decisions: Mutex::new(VecDeque::new()),
            default_decision: answer_decision(),
            summary: "summary".to_string(),
            answer_chunks: vec!["Answer.".to_string()],
            judge_statements: json!({"statements": ["Answer."]}),
            judge_verdicts: json!({"verdicts": [{"verdict": "yes", "reason": "On topic."}]}),
            calls: Mutex::new(HashMap::new()),
            answer_requests: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(self, plan: Value) -> Self {
        self.plans.lock().unwrap().push_back(plan);
        self
    }

    pub fn with_default_plan(mut self, plan: Value) -> Self {
        self.default_plan = plan;
        self
    }

    pub fn with_decision(self, decision: Value) -> Self {
        self.decisions.lock().unwrap().push_back(decision);
        self
    }

    pub fn with_default_decision(mut self, decision: Value) -> Self {
        self.default_decision = decision;
        self
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = summary.to_string();
        self
    }

    pub fn with_answer_chunks(mut self, chunks: &[&str]) -> Self {
        self.answer_chunks = chunks.iter().map(|chunk| chunk.to_string()).collect();
        self
    }

    pub fn with_judgement(mut self, statements: Value, verdicts: Value) -> Self {
        self.judge_statements = statements;
        self.judge_verdicts = verdicts;
        self
    }

    pub fn calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    pub fn answer_requests(&self) -> Vec<OracleRequest> {
        self.answer_requests.lock().unwrap().clone()
    }

    fn count(&self, name: &str) {
        *self.calls.lock().unwrap().entry(name.to_string()).or_default() += 1;
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate_object(
        &self,
        _request: OracleRequest,
        schema: &OutputSchema,
    ) -> Result<Value> {
        self.count(schema.name);
        match schema.name {
            "query_plan" => Ok(self
                .plans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_plan.clone())),
            "next_action" => Ok(self
                .decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.default_decision.clone())),
            "answer_statements" => Ok(self.judge_statements.clone()),
            "relevancy_verdicts" => Ok(self.judge_verdicts.clone()),
            other => Err(ResearchError::Oracle(format!("unexpected schema {other}"))),
        }
    }

    async fn generate_text(&self, _request: OracleRequest) -> Result<String> {
        self.count("summary");
        Ok(self.summary.clone())
    }

    async fn stream_text(&self, request: OracleRequest) -> Result<TextStream> {
        self.count("answer");
        self.answer_requests.lock().unwrap().push(request);
        let mut chunks: Vec<Result<StreamChunk>> = self
            .answer_chunks
            .iter()
            .map(|chunk| Ok(StreamChunk::Delta(chunk.clone())))
            .collect();
        chunks.push(Ok(StreamChunk::Finish(Usage {
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        })));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Search provider with per-query canned responses.
#[derive(Default)]
pub struct MockSearch {
    responses: Mutex<HashMap<String, std::result::Result<Vec<SearchHit>, String>>>,
    default_hits: Vec<SearchHit>,
    calls: AtomicUsize,
    requested_counts: Mutex<Vec<usize>>,
}

impl MockSearch {
    pub fn returning(hits: Vec<SearchHit>) -> Self {
        Self {
            default_hits: hits,
            ..Self::default()
        }
    }

    pub fn with_response(self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(query.to_string(), Ok(hits));
        self
    }

    pub fn with_failure(self, query: &str, reason: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(query.to_string(), Err(reason.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested_counts(&self) -> Vec<usize> {
        self.requested_counts.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearch for MockSearch {
    async fn search(
        &self,
        query: &str,
        result_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested_counts.lock().unwrap().push(result_count);
        if cancel.is_cancelled() {
            return Err(ResearchError::Provider("search cancelled".to_string()));
        }
        match self.responses.lock().unwrap().get(query) {
            Some(Ok(hits)) => Ok(hits.clone()),
            Some(Err(reason)) => Err(ResearchError::Provider(reason.clone())),
            None => Ok(self.default_hits.clone()),
        }
    }
}

/// Fetcher returning `content of <url>` unless the URL is marked as failing.
#[derive(Default)]
pub struct MockFetcher {
    failing: HashSet<String>,
    batches: Mutex<Vec<Vec<String>>>,
}

impl MockFetcher {
    pub fn failing(urls: &[&str]) -> Self {
        Self {
            failing: urls.iter().map(|url| url.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_many(&self, urls: &[String], _cancel: &CancellationToken) -> Vec<FetchOutcome> {
        self.batches.lock().unwrap().push(urls.to_vec());
        urls.iter()
            .map(|url| {
                if self.failing.contains(url) {
                    FetchOutcome::failure(url.clone(), "status 503")
                } else {
                    FetchOutcome::success(url.clone(), format!("content of {url}"))
                }
            })
            .collect()
    }
}

pub fn hit(title: &str, link: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        link: link.to_string(),
        snippet: format!("snippet for {title}"),
        date: Some("2025-01-15".to_string()),
    }
}

pub fn plan(queries: &[&str]) -> Value {
    json!({
        "plan": "Start with background, then narrow down.",
        "queries": queries,
    })
}

pub fn answer_decision() -> Value {
    json!({"type": "answer", "title": "Writing the answer", "reasoning": "Sources agree."})
}

pub fn continue_decision() -> Value {
    json!({"type": "continue", "title": "Digging deeper", "reasoning": "Coverage is thin."})
}

pub fn services(
    oracle: &Arc<ScriptedOracle>,
    search: &Arc<MockSearch>,
    fetcher: &Arc<MockFetcher>,
) -> ResearchServices {
    ResearchServices::new(oracle.clone(), search.clone(), fetcher.clone())
}
