use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::relevancy::AnswerRelevancyScorer;
use crate::state::ConversationMessage;
use crate::workflow::{ResearchServices, ask_deep_search};

static CITATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[[^\]\n]+\]\((https?://[^)\s]+)\)").expect("invalid citation regex")
});

#[derive(Debug, Default, Clone, Deserialize)]
pub struct LogEntry {
    pub session_id: Option<String>,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub steps: u32,
}

/// Counts markdown links to http(s) URLs.
pub fn citation_count(answer: &str) -> usize {
    CITATION.find_iter(answer).count()
}

#[derive(Debug, Default, Clone)]
pub struct EvaluationMetrics {
    pub total_sessions: usize,
    pub average_steps: f32,
    pub forced_answers: usize,
    pub uncited: Vec<String>,
}

impl EvaluationMetrics {
    pub fn record(&mut self, entry: &LogEntry) {
        self.total_sessions += 1;
        self.average_steps = ((self.average_steps * (self.total_sessions - 1) as f32)
            + entry.steps as f32)
            / self.total_sessions as f32;
        if entry.is_final {
            self.forced_answers += 1;
        }
        if citation_count(&entry.answer) == 0 {
            self.uncited.push(
                entry
                    .session_id
                    .clone()
                    .unwrap_or_else(|| format!("line-{}", self.total_sessions)),
            );
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} session(s) • avg steps {:.2} • {} forced answer(s) • {} without citations",
            self.total_sessions,
            self.average_steps,
            self.forced_answers,
            self.uncited.len()
        )
    }
}

pub struct EvaluationHarness;

impl EvaluationHarness {
    pub fn analyze_log(path: impl AsRef<Path>) -> Result<EvaluationMetrics> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("failed to open log file {}", path.as_ref().display()))?;
        let mut metrics = EvaluationMetrics::default();

        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => metrics.record(&entry),
                Err(err) => {
                    tracing::debug!(%err, "skipping malformed evaluation log entry");
                }
            }
        }

        Ok(metrics)
    }
}

/// One question from an evaluation dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EvalCase {
    pub id: String,
    pub question: String,
    /// Reference answer, kept for reports; scoring does not use it.
    #[serde(default)]
    pub expected: Option<String>,
}

/// Read a JSON array of [`EvalCase`]s.
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<EvalCase>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("failed to open dataset {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse dataset {}", path.display()))
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub contains_links: bool,
    /// `None` when no judge ran or it failed.
    pub relevancy: Option<f32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetReport {
    pub cases: Vec<CaseResult>,
}

impl DatasetReport {
    fn answered(&self) -> impl Iterator<Item = &CaseResult> {
        self.cases.iter().filter(|case| case.error.is_none())
    }

    /// Share of answered cases whose answer carries at least one citation link.
    pub fn link_rate(&self) -> f32 {
        let answered = self.answered().count();
        if answered == 0 {
            return 0.0;
        }
        self.answered().filter(|case| case.contains_links).count() as f32 / answered as f32
    }

    pub fn mean_relevancy(&self) -> Option<f32> {
        let scores: Vec<f32> = self.cases.iter().filter_map(|case| case.relevancy).collect();
        (!scores.is_empty()).then(|| scores.iter().sum::<f32>() / scores.len() as f32)
    }

    pub fn failures(&self) -> usize {
        self.cases.iter().filter(|case| case.error.is_some()).count()
    }

    pub fn summary(&self) -> String {
        let relevancy = self
            .mean_relevancy()
            .map(|score| format!("{score:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "{} case(s) • links {:.0}% • relevancy {} • {} failed",
            self.cases.len(),
            self.link_rate() * 100.0,
            relevancy,
            self.failures()
        )
    }
}

/// Runs every dataset question through a full research session and scores it.
pub struct DatasetRunner<'a> {
    services: &'a ResearchServices,
    scorer: Option<AnswerRelevancyScorer>,
}

impl<'a> DatasetRunner<'a> {
    pub fn new(services: &'a ResearchServices) -> Self {
        Self {
            services,
            scorer: None,
        }
    }

    /// Grade answers with an LLM relevancy judge as well as the link check.
    pub fn with_scorer(mut self, scorer: AnswerRelevancyScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Cases run one after another; a failing case is recorded, not fatal.
    pub async fn run(&self, cases: &[EvalCase]) -> DatasetReport {
        let mut report = DatasetReport::default();
        for case in cases {
            info!(id = %case.id, "evaluating case");
            let messages = vec![ConversationMessage::user(case.question.clone())];
            let result = match ask_deep_search(self.services, messages).await {
                Ok(answer) => {
                    let relevancy = self.judge(case, &answer).await;
                    CaseResult {
                        id: case.id.clone(),
                        question: case.question.clone(),
                        contains_links: citation_count(&answer) > 0,
                        answer,
                        relevancy,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(id = %case.id, error = %err, "case failed");
                    CaseResult {
                        id: case.id.clone(),
                        question: case.question.clone(),
                        answer: String::new(),
                        contains_links: false,
                        relevancy: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            report.cases.push(result);
        }
        report
    }

    async fn judge(&self, case: &EvalCase, answer: &str) -> Option<f32> {
        let scorer = self.scorer.as_ref()?;
        scorer
            .score(&case.question, answer)
            .await
            .inspect_err(|err| warn!(id = %case.id, error = %err, "relevancy judge failed"))
            .ok()
            .map(|scored| scored.score)
    }
}
