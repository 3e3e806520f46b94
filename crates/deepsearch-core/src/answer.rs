//! Streams the final cited answer.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chrono::Utc;
use futures::{Stream, StreamExt};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::markdown::join_markdown;
use crate::oracle::{DynOracle, OracleRequest, StreamChunk, TextStream, Usage};
use crate::prompts::{answer_prompt, answer_system};
use crate::state::ResearchState;

/// Answer tokens after markdown joining: deltas, then one finish chunk.
pub type AnswerStream = TextStream;

/// Called once with the full answer text and token usage when the stream completes.
pub type OnFinish = Box<dyn FnOnce(String, Usage) + Send>;

#[derive(Clone)]
pub struct AnswerSynthesizer {
    oracle: DynOracle,
}

impl AnswerSynthesizer {
    pub fn new(oracle: DynOracle) -> Self {
        Self { oracle }
    }

    /// `is_final` marks a forced answer after the step budget ran out; the
    /// prompt then asks the model to name what the sources leave uncovered.
    #[instrument(
        name = "answer.synthesize",
        skip(self, state, on_finish),
        fields(step = state.step())
    )]
    pub async fn synthesize(
        &self,
        state: &ResearchState,
        is_final: bool,
        on_finish: Option<OnFinish>,
    ) -> Result<AnswerStream> {
        let request = OracleRequest::new(answer_prompt(state))
            .with_system(answer_system(is_final, Utc::now()));
        let tokens = join_markdown(self.oracle.stream_text(request).await?);
        debug!(sources = state.source_urls().len(), "answer stream opened");

        Ok(match on_finish {
            Some(hook) => Box::pin(NotifyOnFinish::new(tokens, hook)),
            None => tokens,
        })
    }
}

/// Accumulates deltas and hands the full text to a hook at completion.
struct NotifyOnFinish {
    inner: TextStream,
    text: String,
    hook: Option<OnFinish>,
}

impl NotifyOnFinish {
    fn new(inner: TextStream, hook: OnFinish) -> Self {
        Self {
            inner,
            text: String::new(),
            hook: Some(hook),
        }
    }

    fn fire(&mut self, usage: Usage) {
        if let Some(hook) = self.hook.take() {
            hook(std::mem::take(&mut self.text), usage);
        }
    }
}

impl Stream for NotifyOnFinish {
    type Item = Result<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(this.inner.poll_next_unpin(cx));
        match &item {
            Some(Ok(StreamChunk::Delta(text))) => this.text.push_str(text),
            Some(Ok(StreamChunk::Finish(usage))) => this.fire(*usage),
            Some(Err(_)) => {}
            None => this.fire(Usage::default()),
        }
        Poll::Ready(item)
    }
}
