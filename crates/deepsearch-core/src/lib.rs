//! DeepSearch core: an iterative web research loop.
//!
//! Given a conversation, the loop plans search queries, gathers and
//! summarises web evidence in parallel, asks the oracle whether the evidence
//! suffices, and finally streams a cited markdown answer. Model and web access
//! go through the [`Oracle`], [`providers::WebSearch`] and
//! [`providers::PageFetcher`] traits; HTTP implementations live in
//! [`providers`].

mod action;
mod answer;
mod cache;
pub mod config;
mod error;
mod eval;
mod events;
mod logging;
mod markdown;
pub mod metrics;
mod oracle;
mod orchestrator;
mod pipeline;
mod planner;
mod prompts;
pub mod providers;
mod relevancy;
mod security;
mod state;
mod summarizer;
pub mod telemetry;
mod trace;
mod workflow;

pub use action::{ActionDecision, ActionSelector};
pub use answer::{AnswerStream, AnswerSynthesizer, OnFinish};
pub use cache::{CacheStore, DynCacheStore, InMemoryCacheStore, SummaryCache, cache_key};
pub use config::{Config, ConfigLoader};
pub use error::{ResearchError, Result};
pub use eval::{
    CaseResult, DatasetReport, DatasetRunner, EvalCase, EvaluationHarness, EvaluationMetrics,
    citation_count, load_dataset,
};
pub use events::{
    DynProgressSink, EventCollector, NoopProgress, ProgressAnnotation, ProgressFanOut,
    ProgressSink,
};
pub use logging::{
    SessionLog, SessionLogInput, log_base_dir, log_session_completion, remove_session_logs,
};
pub use markdown::{MarkdownJoiner, MarkdownStream, join_markdown};
pub use oracle::{
    DynOracle, ModelTier, Oracle, OracleRequest, OutputSchema, StreamChunk, StructuredOutput,
    TextStream, Usage, generate_structured,
};
pub use orchestrator::{LoopOutcome, ResearchLoop};
pub use pipeline::EvidencePipeline;
pub use planner::{MAX_QUERIES, QueryPlan, QueryPlanner};
pub use prompts::SummaryPromptInput;
pub use relevancy::{
    AnswerRelevancyScorer, AnswerStatements, RelevancyScore, StatementVerdict, StatementVerdicts,
    Verdict,
};
pub use security::SecretValue;
pub use state::{
    ConversationMessage, EvidenceRecord, ResearchState, Role, SearchRound, UserLocation,
    render_messages,
};
pub use summarizer::PageSummarizer;
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use workflow::{
    ResearchServices, ResearchSession, SessionOptions, SessionOutcome, ask_deep_search,
    run_research_session,
};
