use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::ProgressAnnotation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub action: String,
    pub title: String,
    pub reasoning: String,
    #[serde(default)]
    pub queries: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<&ProgressAnnotation> for TraceEvent {
    fn from(annotation: &ProgressAnnotation) -> Self {
        let ProgressAnnotation::NewAction {
            timestamp,
            action,
            plan,
            ..
        } = annotation;
        Self {
            action: action.kind().to_string(),
            title: action.title().to_string(),
            reasoning: action.reasoning().to_string(),
            queries: plan
                .as_ref()
                .map(|plan| plan.queries.clone())
                .unwrap_or_default(),
            timestamp: *timestamp,
        }
    }
}

/// Accumulates progress annotations into a replayable trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Take whatever is already queued without waiting.
    pub fn drain(&mut self, receiver: &mut mpsc::UnboundedReceiver<ProgressAnnotation>) {
        while let Ok(annotation) = receiver.try_recv() {
            self.record(&annotation);
        }
    }

    pub fn record(&mut self, annotation: &ProgressAnnotation) {
        self.events.push(TraceEvent::from(annotation));
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub action: String,
    pub title: String,
    pub reasoning: String,
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                action: event.action.clone(),
                title: event.title.clone(),
                reasoning: event.reasoning.clone(),
                queries: event.queries.clone(),
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No reasoning steps recorded.".to_string();
        }
        let mut output = String::from("### Reasoning Steps\n");
        for step in &self.steps {
            let _ = writeln!(output, "{}. **{}** ({})", step.index, step.title, step.action);
            if !step.reasoning.trim().is_empty() {
                let _ = writeln!(output, "   {}", step.reasoning.trim());
            }
            for query in &step.queries {
                let _ = writeln!(output, "   - {query}");
            }
        }
        output
    }
}

pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    session_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{session_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionDecision;
    use crate::events::{EventCollector, ProgressSink};
    use crate::planner::QueryPlan;
    use tempfile::TempDir;

    fn annotations() -> Vec<ProgressAnnotation> {
        vec![
            ProgressAnnotation::new_action(
                ActionDecision::Continue {
                    title: "Researching the question".into(),
                    reasoning: "no evidence yet".into(),
                },
                Some(QueryPlan {
                    plan: "start broad".into(),
                    queries: vec!["capital of France".into()],
                }),
            ),
            ProgressAnnotation::new_action(
                ActionDecision::Answer {
                    title: "Writing the answer".into(),
                    reasoning: "sources agree".into(),
                },
                None,
            ),
        ]
    }

    #[test]
    fn drain_takes_queued_annotations() {
        let (collector, mut receiver) = EventCollector::new();
        for annotation in annotations() {
            collector.notify(annotation);
        }

        let mut trace = TraceCollector::new();
        trace.drain(&mut receiver);
        assert_eq!(trace.events().len(), 2);
        assert_eq!(trace.events()[0].queries, vec!["capital of France".to_string()]);
        assert_eq!(trace.events()[1].action, "answer");
    }

    #[test]
    fn markdown_lists_steps_and_queries() {
        let mut trace = TraceCollector::new();
        for annotation in annotations() {
            trace.record(&annotation);
        }
        let markdown = trace.summary().render_markdown();
        assert!(markdown.starts_with("### Reasoning Steps"));
        assert!(markdown.contains("1. **Researching the question** (continue)"));
        assert!(markdown.contains("   - capital of France"));
        assert!(markdown.contains("2. **Writing the answer** (answer)"));
    }

    #[test]
    fn empty_trace_renders_placeholder() {
        assert_eq!(
            TraceCollector::new().summary().render_markdown(),
            "No reasoning steps recorded."
        );
    }

    #[test]
    fn persisted_trace_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut trace = TraceCollector::new();
        trace.record(&annotations()[0]);

        let path = persist_trace(dir.path(), "session-1", trace.events()).unwrap();
        assert!(path.ends_with("session-1.json"));
        let stored: Vec<TraceEvent> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored, trace.events());
    }
}
