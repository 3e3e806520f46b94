//! Query planning for each research cycle.
//!
//! The planner asks the oracle for a narrative research plan plus 1-5 natural
//! language search queries ordered from foundational to specific.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::oracle::{DynOracle, OracleRequest, StructuredOutput, generate_structured};
use crate::prompts::{PLANNER_SYSTEM, planner_prompt};
use crate::state::ResearchState;

pub const MAX_QUERIES: usize = 5;

/// Plan produced fresh every planning cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub plan: String,
    pub queries: Vec<String>,
}

impl StructuredOutput for QueryPlan {
    const NAME: &'static str = "query_plan";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan": {
                    "type": "string",
                    "description": "A detailed research plan that outlines the logical progression of information needed to answer the question."
                },
                "queries": {
                    "type": "array",
                    "items": { "type": "string" },
                    "minItems": 1,
                    "maxItems": MAX_QUERIES,
                    "description": "1-5 sequential natural-language search queries without Boolean operators, ordered from foundational to specific."
                }
            },
            "required": ["plan", "queries"],
            "additionalProperties": false
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.queries.is_empty() {
            return Err("queries must contain at least one entry".into());
        }
        if self.queries.len() > MAX_QUERIES {
            return Err(format!(
                "queries must contain at most {MAX_QUERIES} entries, got {}",
                self.queries.len()
            ));
        }
        if let Some(idx) = self.queries.iter().position(|q| q.trim().is_empty()) {
            return Err(format!("query #{} is empty", idx + 1));
        }
        Ok(())
    }
}

/// Planner agent that turns the running research state into search queries.
#[derive(Clone)]
pub struct QueryPlanner {
    oracle: DynOracle,
}

impl QueryPlanner {
    pub fn new(oracle: DynOracle) -> Self {
        Self { oracle }
    }

    /// Issue exactly one oracle call; malformed output surfaces as a schema violation.
    #[instrument(name = "planner.plan", skip(self, state), fields(step = state.step()))]
    pub async fn plan(&self, state: &ResearchState) -> Result<QueryPlan> {
        let request =
            OracleRequest::new(planner_prompt(state, Utc::now())).with_system(PLANNER_SYSTEM);
        let mut plan: QueryPlan = generate_structured(self.oracle.as_ref(), request).await?;

        for query in plan.queries.iter_mut() {
            *query = query.trim().to_string();
        }

        info!(queries = plan.queries.len(), "research plan ready");
        debug!(plan = %plan.plan, queries = ?plan.queries, "planner output");
        Ok(plan)
    }
}
