//! Bounded research loop.
//!
//! Executes `plan → gather → decide` cycles over a single owned
//! [`ResearchState`] until the oracle chooses to answer or the step budget is
//! spent, then hands the state to the answer synthesizer.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::action::{ActionDecision, ActionSelector};
use crate::answer::{AnswerStream, AnswerSynthesizer, OnFinish};
use crate::error::Result;
use crate::events::{DynProgressSink, ProgressAnnotation};
use crate::metrics::record_session;
use crate::pipeline::EvidencePipeline;
use crate::planner::QueryPlanner;
use crate::state::{ResearchState, SearchRound};

/// What the loop hands back once it starts answering.
pub struct LoopOutcome {
    pub stream: AnswerStream,
    /// `true` when the budget forced the answer rather than the oracle choosing it.
    pub is_final: bool,
    pub steps: u32,
    pub sources: Vec<String>,
}

impl std::fmt::Debug for LoopOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopOutcome")
            .field("is_final", &self.is_final)
            .field("steps", &self.steps)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ResearchLoop {
    planner: QueryPlanner,
    selector: ActionSelector,
    pipeline: EvidencePipeline,
    synthesizer: AnswerSynthesizer,
    progress: DynProgressSink,
}

impl ResearchLoop {
    pub fn new(
        planner: QueryPlanner,
        selector: ActionSelector,
        pipeline: EvidencePipeline,
        synthesizer: AnswerSynthesizer,
        progress: DynProgressSink,
    ) -> Self {
        Self {
            planner,
            selector,
            pipeline,
            synthesizer,
            progress,
        }
    }

    /// Drive the loop to completion. Planner and selector failures abort it.
    #[instrument(name = "research.loop", skip_all, fields(max_steps = state.max_steps()))]
    pub async fn run(
        &self,
        mut state: ResearchState,
        cancel: &CancellationToken,
        on_finish: Option<OnFinish>,
    ) -> Result<LoopOutcome> {
        let initial = ActionDecision::Continue {
            title: "Researching the question".to_string(),
            reasoning: "No evidence has been gathered yet.".to_string(),
        };
        self.research_cycle(&mut state, initial, cancel)
            .await
            .inspect_err(|err| error!(error = %err, step = 0, "initial planning failed"))?;

        while !state.should_stop() {
            let decision = self
                .selector
                .decide(&state)
                .await
                .inspect_err(|err| error!(error = %err, step = state.step(), "decision failed"))?;

            if decision.is_answer() {
                self.progress
                    .notify(ProgressAnnotation::new_action(decision, None));
                return self.answer(state, false, on_finish).await;
            }

            let step = state.step();
            self.research_cycle(&mut state, decision, cancel)
                .await
                .inspect_err(|err| error!(error = %err, step, "replanning failed"))?;
        }

        info!(steps = state.step(), "step budget exhausted; forcing an answer");
        let forced = ActionDecision::Answer {
            title: "Answering with the evidence gathered".to_string(),
            reasoning: format!(
                "Reached the limit of {} research steps.",
                state.max_steps()
            ),
        };
        self.progress
            .notify(ProgressAnnotation::new_action(forced, None));
        self.answer(state, true, on_finish).await
    }

    /// Plan, fan every query through the pipeline, record rounds in plan order.
    ///
    /// The NEW_ACTION annotation carries the plan, so it goes out only after the
    /// planner's oracle call returns and before any query is gathered.
    async fn research_cycle(
        &self,
        state: &mut ResearchState,
        action: ActionDecision,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plan = self.planner.plan(state).await?;
        self.progress
            .notify(ProgressAnnotation::new_action(action, Some(plan.clone())));

        let batches = join_all(
            plan.queries
                .iter()
                .map(|query| self.pipeline.gather(query, state.conversation(), cancel)),
        )
        .await;

        for (query, results) in plan.queries.into_iter().zip(batches) {
            state.record_search_round(SearchRound::new(query, results));
        }
        state.increment_step();
        info!(
            step = state.step(),
            rounds = state.rounds().len(),
            "research cycle complete"
        );
        Ok(())
    }

    async fn answer(
        &self,
        state: ResearchState,
        is_final: bool,
        on_finish: Option<OnFinish>,
    ) -> Result<LoopOutcome> {
        let stream = self
            .synthesizer
            .synthesize(&state, is_final, on_finish)
            .await
            .inspect_err(|err| error!(error = %err, "answer synthesis failed"))?;
        record_session(is_final, state.step());

        Ok(LoopOutcome {
            stream,
            is_final,
            steps: state.step(),
            sources: state.source_urls(),
        })
    }
}
