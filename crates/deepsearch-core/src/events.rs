//! Progress annotations published while a research loop runs.
//!
//! The loop announces every transition before executing it so a caller can
//! render "what is happening now" without waiting for the answer stream.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::action::ActionDecision;
use crate::planner::QueryPlan;

pub type EventId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressAnnotation {
    /// The loop is about to gather evidence for `plan`, or to answer.
    NewAction {
        event_id: EventId,
        timestamp: DateTime<Utc>,
        action: ActionDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<QueryPlan>,
    },
}

impl ProgressAnnotation {
    pub fn new_action(action: ActionDecision, plan: Option<QueryPlan>) -> Self {
        ProgressAnnotation::NewAction {
            event_id: generate_event_id(),
            timestamp: Utc::now(),
            action,
            plan,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            ProgressAnnotation::NewAction { event_id, .. } => event_id,
        }
    }

    pub fn action(&self) -> &ActionDecision {
        match self {
            ProgressAnnotation::NewAction { action, .. } => action,
        }
    }

    pub fn plan(&self) -> Option<&QueryPlan> {
        match self {
            ProgressAnnotation::NewAction { plan, .. } => plan.as_ref(),
        }
    }
}

/// Fire-and-forget receiver of progress annotations. Must not block.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, annotation: ProgressAnnotation);
}

pub type DynProgressSink = Arc<dyn ProgressSink>;

/// Discards every annotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn notify(&self, _annotation: ProgressAnnotation) {}
}

/// Forwards each annotation to several sinks in order.
#[derive(Clone, Default)]
pub struct ProgressFanOut {
    sinks: Vec<DynProgressSink>,
}

impl ProgressFanOut {
    pub fn new(sinks: Vec<DynProgressSink>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: DynProgressSink) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for ProgressFanOut {
    fn notify(&self, annotation: ProgressAnnotation) {
        for sink in &self.sinks {
            sink.notify(annotation.clone());
        }
    }
}

/// Publishes annotations on an unbounded channel.
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<ProgressAnnotation>,
}

impl EventCollector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressAnnotation>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for EventCollector {
    fn notify(&self, annotation: ProgressAnnotation) {
        let event_id = annotation.event_id().to_string();
        if let Err(err) = self.sender.send(annotation) {
            tracing::warn!(%event_id, error = %err, "progress receiver dropped; annotation lost");
        }
    }
}

fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{id}")
}
