//! Keeps markdown links and bold spans intact across streamed chunks.
//!
//! Tokens arrive from the oracle in arbitrary fragments. A client rendering
//! each fragment as it lands would briefly show half a link such as
//! `[Source](http://`. [`MarkdownJoiner`] holds back text from an opening `[`
//! or `*` until the span completes, a newline proves it was not a span, or the
//! stream ends.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::Stream;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::Result;
use crate::oracle::{StreamChunk, TextStream};

static COMPLETE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\]]*)\]\(([^)]*)\)$").expect("invalid link regex"));
static COMPLETE_BOLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*\*([^*]*)\*\*$").expect("invalid bold regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Link,
    Bold,
}

impl SpanKind {
    fn opened_by(ch: char) -> Option<Self> {
        match ch {
            '[' => Some(SpanKind::Link),
            '*' => Some(SpanKind::Bold),
            _ => None,
        }
    }

    fn is_complete(self, buffer: &str) -> bool {
        match self {
            SpanKind::Link => COMPLETE_LINK.is_match(buffer),
            SpanKind::Bold => COMPLETE_BOLD.is_match(buffer),
        }
    }
}

/// Character-level state machine: passthrough, or buffering one span kind.
#[derive(Debug, Default)]
pub struct MarkdownJoiner {
    buffer: String,
    pending: Option<SpanKind>,
}

impl MarkdownJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_buffering(&self) -> bool {
        self.pending.is_some()
    }

    /// Feed one fragment and return whatever can be emitted safely.
    pub fn process(&mut self, text: &str) -> String {
        let mut output = String::with_capacity(text.len());

        for ch in text.chars() {
            let Some(kind) = self.pending else {
                match SpanKind::opened_by(ch) {
                    Some(kind) => {
                        self.pending = Some(kind);
                        self.buffer.push(ch);
                    }
                    None => output.push(ch),
                }
                continue;
            };

            self.buffer.push(ch);
            if kind.is_complete(&self.buffer) || ch == '\n' {
                output.push_str(&self.buffer);
                self.clear();
            }
        }

        output
    }

    /// Release anything still held back, verbatim.
    pub fn flush(&mut self) -> String {
        let remaining = std::mem::take(&mut self.buffer);
        self.pending = None;
        remaining
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }
}

/// [`Stream`] adapter applying a [`MarkdownJoiner`] to the deltas of a text stream.
///
/// Held-back text is released before the finish chunk, or when the inner
/// stream ends without one.
pub struct MarkdownStream<S> {
    inner: S,
    joiner: MarkdownJoiner,
    ready: VecDeque<Result<StreamChunk>>,
    exhausted: bool,
}

impl<S> MarkdownStream<S>
where
    S: Stream<Item = Result<StreamChunk>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            joiner: MarkdownJoiner::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }
    }

    fn release_buffer(&mut self) {
        let remaining = self.joiner.flush();
        if !remaining.is_empty() {
            self.ready.push_back(Ok(StreamChunk::Delta(remaining)));
        }
    }
}

impl<S> Stream for MarkdownStream<S>
where
    S: Stream<Item = Result<StreamChunk>> + Unpin,
{
    type Item = Result<StreamChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(item) = this.ready.pop_front() {
                return Poll::Ready(Some(item));
            }
            if this.exhausted {
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(StreamChunk::Delta(text))) => {
                    let emitted = this.joiner.process(&text);
                    if !emitted.is_empty() {
                        this.ready.push_back(Ok(StreamChunk::Delta(emitted)));
                    }
                }
                Some(Ok(StreamChunk::Finish(usage))) => {
                    this.release_buffer();
                    this.ready.push_back(Ok(StreamChunk::Finish(usage)));
                }
                Some(Err(err)) => this.ready.push_back(Err(err)),
                None => {
                    this.exhausted = true;
                    this.release_buffer();
                }
            }
        }
    }
}

pub fn join_markdown(stream: TextStream) -> TextStream {
    Box::pin(MarkdownStream::new(stream))
}
