//! LLM-judged answer relevancy.
//!
//! An answer is split into statements, each statement gets a `yes`, `unsure`
//! or `no` verdict against the question, and the score is the mean of
//! 1.0 / 0.5 / 0.0 over those verdicts.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{ResearchError, Result};
use crate::oracle::{DynOracle, OracleRequest, StructuredOutput, generate_structured};
use crate::prompts::{RELEVANCY_SYSTEM, relevancy_prompt, statements_prompt};

/// Statements extracted from an answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AnswerStatements {
    pub statements: Vec<String>,
}

impl StructuredOutput for AnswerStatements {
    const NAME: &'static str = "answer_statements";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "statements": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Array of statements from the text"
                }
            },
            "required": ["statements"],
            "additionalProperties": false
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Yes,
    Unsure,
    No,
}

impl Verdict {
    pub fn weight(self) -> f32 {
        match self {
            Verdict::Yes => 1.0,
            Verdict::Unsure => 0.5,
            Verdict::No => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementVerdict {
    pub verdict: Verdict,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatementVerdicts {
    pub verdicts: Vec<StatementVerdict>,
}

impl StructuredOutput for StatementVerdicts {
    const NAME: &'static str = "relevancy_verdicts";

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "verdicts": {
                    "type": "array",
                    "description": "Array of verdicts for each statement",
                    "items": {
                        "type": "object",
                        "properties": {
                            "verdict": { "type": "string", "enum": ["yes", "no", "unsure"] },
                            "reason": { "type": "string" }
                        },
                        "required": ["verdict", "reason"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["verdicts"],
            "additionalProperties": false
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevancyScore {
    /// Mean verdict weight in `0.0..=1.0`; `0.0` when no statements were found.
    pub score: f32,
    pub statements: Vec<String>,
    pub verdicts: Vec<StatementVerdict>,
}

#[derive(Clone)]
pub struct AnswerRelevancyScorer {
    oracle: DynOracle,
}

impl AnswerRelevancyScorer {
    pub fn new(oracle: DynOracle) -> Self {
        Self { oracle }
    }

    #[instrument(name = "eval.relevancy", skip(self, answer))]
    pub async fn score(&self, question: &str, answer: &str) -> Result<RelevancyScore> {
        let request = OracleRequest::new(statements_prompt(answer));
        let extracted: AnswerStatements = generate_structured(self.oracle.as_ref(), request).await?;
        let statements: Vec<String> = extracted
            .statements
            .into_iter()
            .map(|statement| statement.trim().to_string())
            .filter(|statement| !statement.is_empty())
            .collect();

        if statements.is_empty() {
            debug!("no statements extracted; scoring zero");
            return Ok(RelevancyScore {
                score: 0.0,
                statements,
                verdicts: Vec::new(),
            });
        }

        let request = OracleRequest::new(relevancy_prompt(question, &statements))
            .with_system(RELEVANCY_SYSTEM);
        let judged: StatementVerdicts = generate_structured(self.oracle.as_ref(), request).await?;
        if judged.verdicts.len() != statements.len() {
            return Err(ResearchError::schema_violation(
                StatementVerdicts::NAME,
                format!(
                    "expected {} verdicts, got {}",
                    statements.len(),
                    judged.verdicts.len()
                ),
            ));
        }

        let total: f32 = judged.verdicts.iter().map(|v| v.verdict.weight()).sum();
        Ok(RelevancyScore {
            score: total / judged.verdicts.len() as f32,
            statements,
            verdicts: judged.verdicts,
        })
    }
}
