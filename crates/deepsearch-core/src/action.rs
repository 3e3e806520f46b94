use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use crate::error::Result;
use crate::oracle::{DynOracle, OracleRequest, StructuredOutput, generate_structured};
use crate::prompts::{DECISION_SYSTEM, decision_prompt};
use crate::state::ResearchState;

/// Whether the loop should keep gathering evidence or answer now.
///
/// `title` is shown to the user as a progress label; `reasoning` is advisory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDecision {
    Continue { title: String, reasoning: String },
    Answer { title: String, reasoning: String },
}

impl ActionDecision {
    pub fn is_answer(&self) -> bool {
        matches!(self, ActionDecision::Answer { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ActionDecision::Continue { .. } => "continue",
            ActionDecision::Answer { .. } => "answer",
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ActionDecision::Continue { title, .. } | ActionDecision::Answer { title, .. } => title,
        }
    }

    pub fn reasoning(&self) -> &str {
        match self {
            ActionDecision::Continue { reasoning, .. }
            | ActionDecision::Answer { reasoning, .. } => reasoning,
        }
    }
}

impl StructuredOutput for ActionDecision {
    const NAME: &'static str = "next_action";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["continue", "answer"],
                    "description": "'continue' to run another round of searches, 'answer' when the evidence is sufficient."
                },
                "title": {
                    "type": "string",
                    "description": "Short title shown to the user, e.g. 'Searching for recent ticket prices' or 'Preparing the answer'."
                },
                "reasoning": {
                    "type": "string",
                    "description": "Why this action was chosen."
                }
            },
            "required": ["type", "title", "reasoning"],
            "additionalProperties": false
        })
    }
}

/// Judges whether the evidence gathered so far is sufficient.
#[derive(Clone)]
pub struct ActionSelector {
    oracle: DynOracle,
}

impl ActionSelector {
    pub fn new(oracle: DynOracle) -> Self {
        Self { oracle }
    }

    #[instrument(name = "selector.decide", skip(self, state), fields(step = state.step()))]
    pub async fn decide(&self, state: &ResearchState) -> Result<ActionDecision> {
        let request =
            OracleRequest::new(decision_prompt(state, Utc::now())).with_system(DECISION_SYSTEM);
        let decision: ActionDecision = generate_structured(self.oracle.as_ref(), request).await?;
        info!(action = decision.kind(), title = decision.title(), "next action chosen");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_decisions() {
        let decision: ActionDecision = serde_json::from_value(json!({
            "type": "answer",
            "title": "Answering",
            "reasoning": "enough sources"
        }))
        .unwrap();
        assert!(decision.is_answer());
        assert_eq!(decision.title(), "Answering");
        assert_eq!(decision.reasoning(), "enough sources");
    }

    #[test]
    fn rejects_unknown_action_type() {
        let result = serde_json::from_value::<ActionDecision>(json!({
            "type": "search",
            "title": "Searching",
            "reasoning": "r"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn serializes_with_type_tag() {
        let decision = ActionDecision::Continue {
            title: "More searching".into(),
            reasoning: "gaps".into(),
        };
        assert_eq!(serde_json::to_value(&decision).unwrap()["type"], "continue");
        assert_eq!(decision.kind(), "continue");
    }
}
