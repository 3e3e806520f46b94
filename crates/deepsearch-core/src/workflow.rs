//! Session-level entry points: wire collaborators, run the loop, record the outcome.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::action::ActionSelector;
use crate::answer::{AnswerStream, AnswerSynthesizer, OnFinish};
use crate::cache::{DynCacheStore, SummaryCache};
use crate::config::{Config, ResearchConfig, SearchConfig};
use crate::error::{ResearchError, Result};
use crate::events::{DynProgressSink, EventCollector, ProgressAnnotation, ProgressFanOut};
use crate::logging::{SessionLogInput, log_base_dir, log_session_completion};
use crate::oracle::{DynOracle, StreamChunk, Usage};
use crate::orchestrator::ResearchLoop;
use crate::pipeline::EvidencePipeline;
use crate::planner::QueryPlanner;
use crate::providers::{DynPageFetcher, DynWebSearch, HttpPageFetcher, OpenAiOracle, SerperSearch};
use crate::state::{ConversationMessage, ResearchState, Role, UserLocation};
use crate::summarizer::PageSummarizer;
use crate::trace::{TraceCollector, TraceSummary, persist_trace};

/// Shared collaborators reused across sessions.
#[derive(Clone)]
pub struct ResearchServices {
    oracle: DynOracle,
    search: DynWebSearch,
    fetcher: DynPageFetcher,
    cache: SummaryCache,
    result_count: usize,
    max_steps: u32,
    session_log_dir: Option<PathBuf>,
}

impl ResearchServices {
    /// In-memory summary cache, three results per query, five steps, no session log.
    pub fn new(oracle: DynOracle, search: DynWebSearch, fetcher: DynPageFetcher) -> Self {
        Self {
            oracle,
            search,
            fetcher,
            cache: SummaryCache::in_memory(),
            result_count: SearchConfig::DEFAULT_RESULT_COUNT,
            max_steps: ResearchConfig::DEFAULT_MAX_STEPS,
            session_log_dir: None,
        }
    }

    /// Build HTTP-backed providers from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.fetch.user_agent.clone())
            .build()
            .map_err(|err| ResearchError::Provider(format!("failed to build HTTP client: {err}")))?;

        let oracle = Arc::new(OpenAiOracle::new(
            http.clone(),
            &config.llm,
            config.llm_api_key()?,
        ));
        let search = Arc::new(SerperSearch::new(
            http.clone(),
            config.search.endpoint.clone(),
            config.search_api_key()?,
        ));
        let fetcher = Arc::new(HttpPageFetcher::new(http, &config.fetch));

        Ok(Self::new(oracle, search, fetcher)
            .with_result_count(config.search.result_count)
            .with_max_steps(config.research.max_steps)
            .with_session_log_dir(log_base_dir(config.logging.dir.as_deref())))
    }

    pub fn with_cache_store(mut self, store: DynCacheStore) -> Self {
        self.cache = SummaryCache::new(store);
        self
    }

    pub fn with_result_count(mut self, result_count: usize) -> Self {
        self.result_count = result_count;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Enables JSONL session logging under `dir`.
    pub fn with_session_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_log_dir = Some(dir.into());
        self
    }

    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    pub fn oracle(&self) -> &DynOracle {
        &self.oracle
    }

    fn research_loop(&self, progress: DynProgressSink) -> ResearchLoop {
        let summarizer = PageSummarizer::new(self.oracle.clone(), self.cache.clone());
        ResearchLoop::new(
            QueryPlanner::new(self.oracle.clone()),
            ActionSelector::new(self.oracle.clone()),
            EvidencePipeline::new(
                self.search.clone(),
                self.fetcher.clone(),
                summarizer,
                self.result_count,
            ),
            AnswerSynthesizer::new(self.oracle.clone()),
            progress,
        )
    }
}

/// Options for running a research session.
#[derive(Default)]
pub struct SessionOptions {
    pub messages: Vec<ConversationMessage>,
    pub location: Option<UserLocation>,
    pub session_id: Option<String>,
    pub max_steps: Option<u32>,
    pub progress: Option<DynProgressSink>,
    pub on_finish: Option<OnFinish>,
    pub cancel: Option<CancellationToken>,
    pub trace_dir: Option<PathBuf>,
}

impl SessionOptions {
    pub fn new(messages: Vec<ConversationMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn question(question: impl Into<String>) -> Self {
        Self::new(vec![ConversationMessage::user(question)])
    }

    pub fn with_location(mut self, location: UserLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_progress(mut self, progress: DynProgressSink) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_on_finish(mut self, on_finish: OnFinish) -> Self {
        self.on_finish = Some(on_finish);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Persist the reasoning trace as `<dir>/<session_id>.json` once the answer completes.
    pub fn with_trace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.trace_dir = Some(dir.into());
        self
    }
}

fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

/// A research loop that has reached the answering phase.
pub struct ResearchSession {
    pub session_id: String,
    pub is_final: bool,
    pub steps: u32,
    pub sources: Vec<String>,
    pub stream: AnswerStream,
    question: Option<String>,
    annotations: mpsc::UnboundedReceiver<ProgressAnnotation>,
    trace_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

/// Everything known about a finished session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub answer: String,
    pub is_final: bool,
    pub steps: u32,
    pub sources: Vec<String>,
    pub usage: Usage,
    pub trace: TraceSummary,
    pub trace_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
}

impl ResearchSession {
    /// Drain the answer stream and record the session.
    pub async fn collect(self) -> Result<SessionOutcome> {
        self.collect_with(|_| {}).await
    }

    /// Like [`collect`](Self::collect), handing each delta to `on_delta` as it arrives.
    pub async fn collect_with<F>(mut self, mut on_delta: F) -> Result<SessionOutcome>
    where
        F: FnMut(&str),
    {
        let mut answer = String::new();
        let mut usage = Usage::default();
        while let Some(chunk) = self.stream.next().await {
            match chunk? {
                StreamChunk::Delta(text) => {
                    on_delta(&text);
                    answer.push_str(&text);
                }
                StreamChunk::Finish(finished) => usage = finished,
            }
        }

        let mut trace = TraceCollector::new();
        trace.drain(&mut self.annotations);

        let trace_path = self.trace_dir.as_ref().and_then(|dir| {
            persist_trace(dir, &self.session_id, trace.events())
                .inspect_err(|err| warn!(error = %err, "failed to persist reasoning trace"))
                .ok()
        });

        let log_path = self.log_dir.as_deref().and_then(|dir| {
            let input = SessionLogInput {
                session_id: self.session_id.clone(),
                question: self.question.clone(),
                answer: answer.clone(),
                is_final: self.is_final,
                steps: self.steps,
                sources: self.sources.clone(),
                trace_path: trace_path.as_ref().map(|path| path.display().to_string()),
            };
            log_session_completion(input, Some(dir))
                .inspect_err(|err| warn!(error = %err, "failed to write session log"))
                .ok()
        });

        info!(
            session_id = %self.session_id,
            steps = self.steps,
            is_final = self.is_final,
            tokens = usage.total_tokens,
            "research session complete"
        );

        Ok(SessionOutcome {
            session_id: self.session_id,
            answer,
            is_final: self.is_final,
            steps: self.steps,
            sources: self.sources,
            usage,
            trace: trace.summary(),
            trace_path,
            log_path,
        })
    }
}

/// Run the loop until it starts answering and return the live answer stream.
#[instrument(name = "research.session", skip_all, fields(session_id))]
pub async fn run_research_session(
    services: &ResearchServices,
    options: SessionOptions,
) -> Result<ResearchSession> {
    if !options
        .messages
        .iter()
        .any(|message| message.role == Role::User)
    {
        return Err(ResearchError::InvalidConfiguration(
            "conversation must contain at least one user message".into(),
        ));
    }

    let session_id = options.session_id.unwrap_or_else(new_session_id);
    tracing::Span::current().record("session_id", session_id.as_str());

    let max_steps = options.max_steps.unwrap_or(services.max_steps);
    if max_steps == 0 {
        return Err(ResearchError::InvalidConfiguration(
            "max_steps must be at least 1".into(),
        ));
    }

    let (collector, annotations) = EventCollector::new();
    let mut progress = ProgressFanOut::default();
    progress.push(Arc::new(collector));
    if let Some(sink) = options.progress {
        progress.push(sink);
    }

    let state = ResearchState::with_budget(options.messages, options.location, max_steps);
    let question = state.latest_question().map(str::to_string);
    let cancel = options.cancel.unwrap_or_else(CancellationToken::new);

    let outcome = services
        .research_loop(Arc::new(progress))
        .run(state, &cancel, options.on_finish)
        .await?;

    Ok(ResearchSession {
        session_id,
        is_final: outcome.is_final,
        steps: outcome.steps,
        sources: outcome.sources,
        stream: outcome.stream,
        question,
        annotations,
        trace_dir: options.trace_dir,
        log_dir: services.session_log_dir.clone(),
    })
}

/// Run a session with default options and return the full answer text.
pub async fn ask_deep_search(
    services: &ResearchServices,
    messages: Vec<ConversationMessage>,
) -> Result<String> {
    let session = run_research_session(services, SessionOptions::new(messages)).await?;
    Ok(session.collect().await?.answer)
}
