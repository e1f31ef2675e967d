//! Streaming response aggregation.
//!
//! Raw event-stream text flows through the frame splitter, the payload
//! decoder and a dialect schema into one [`state::AggregationState`], which
//! the finalizer turns into the dialect's non-streaming response object.

pub(crate) mod decode;
pub mod engine;
pub(crate) mod finalize;
pub mod state;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use self::engine::fold_frame;
use self::finalize::finalize;
use self::state::AggregationState;
use crate::protocol::{
    AnthropicSchema, Dialect, DialectSchema, GeminiSchema, OpenAiChatSchema,
    OpenAiResponsesSchema,
};
use crate::stream::{frame_stream, split_frames, Frame, FrameSplitter};

/// Diagnostics collected while folding a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMeta {
    /// Decoded payloads that carried a type name or a recognized shape,
    /// whether or not the type is part of the dialect. Payloads with neither
    /// are dropped uncounted.
    pub event_count: u64,
    pub parse_error_count: u64,
    /// Sorted, unique.
    pub unknown_event_types: Vec<String>,
    /// Payloads that addressed an index beyond
    /// [`MAX_INDEX`](state::MAX_INDEX). Omitted when zero.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub out_of_range_count: u64,
}

fn is_zero(count: &u64) -> bool {
    *count == 0
}

/// Reconstructed response plus diagnostics. Serializes as
/// `{"response": ..., "meta": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregated {
    pub response: Value,
    pub meta: AggregateMeta,
}

impl Aggregated {
    /// The response alone, or the `{response, meta}` wrapper.
    #[must_use]
    pub fn into_output(self, include_meta: bool) -> Value {
        if !include_meta {
            return self.response;
        }
        let mut wrapper = Map::new();
        wrapper.insert("response".to_owned(), self.response);
        wrapper.insert(
            "meta".to_owned(),
            serde_json::to_value(self.meta).unwrap_or(Value::Null),
        );
        Value::Object(wrapper)
    }
}

/// Incremental aggregator for one stream and one dialect.
///
/// Input can be fed as chunks with arbitrary boundaries, as complete lines,
/// or as already-split frames; [`StreamAggregator::finish`] flushes whatever
/// is pending and finalizes. Dropping the aggregator aborts the conversion.
pub struct StreamAggregator<S: DialectSchema> {
    schema: S,
    splitter: FrameSplitter,
    frames: Vec<Frame>,
    state: AggregationState,
}

impl<S: DialectSchema> StreamAggregator<S> {
    #[must_use]
    pub fn new(schema: S) -> Self {
        Self {
            schema,
            splitter: FrameSplitter::new(),
            frames: Vec::with_capacity(4),
            state: AggregationState::new(),
        }
    }

    pub fn feed(&mut self, chunk: &str) {
        self.splitter.feed_into(chunk, &mut self.frames);
        self.fold_pending();
    }

    /// Feed one complete line (terminator already stripped).
    pub fn feed_line(&mut self, line: &str) {
        self.splitter.push_line(line, &mut self.frames);
        self.fold_pending();
    }

    pub fn feed_frame(&mut self, frame: &Frame) {
        fold_frame(&self.schema, &mut self.state, frame);
    }

    #[must_use]
    pub fn finish(mut self) -> Aggregated {
        self.splitter.finish_into(&mut self.frames);
        self.fold_pending();
        finalize(&self.schema, self.state)
    }

    fn fold_pending(&mut self) {
        for frame in self.frames.drain(..) {
            fold_frame(&self.schema, &mut self.state, &frame);
        }
    }
}

/// [`StreamAggregator`] for a dialect chosen at runtime.
pub enum Aggregator {
    OpenAiChat(StreamAggregator<OpenAiChatSchema>),
    OpenAiResponses(StreamAggregator<OpenAiResponsesSchema>),
    Anthropic(StreamAggregator<AnthropicSchema>),
    Gemini(StreamAggregator<GeminiSchema>),
}

impl Aggregator {
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        match dialect {
            Dialect::OpenAiChat => Self::OpenAiChat(StreamAggregator::new(OpenAiChatSchema)),
            Dialect::OpenAiResponses => {
                Self::OpenAiResponses(StreamAggregator::new(OpenAiResponsesSchema))
            }
            Dialect::Anthropic => Self::Anthropic(StreamAggregator::new(AnthropicSchema)),
            Dialect::Gemini => Self::Gemini(StreamAggregator::new(GeminiSchema)),
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::OpenAiChat(_) => Dialect::OpenAiChat,
            Self::OpenAiResponses(_) => Dialect::OpenAiResponses,
            Self::Anthropic(_) => Dialect::Anthropic,
            Self::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn feed(&mut self, chunk: &str) {
        match self {
            Self::OpenAiChat(inner) => inner.feed(chunk),
            Self::OpenAiResponses(inner) => inner.feed(chunk),
            Self::Anthropic(inner) => inner.feed(chunk),
            Self::Gemini(inner) => inner.feed(chunk),
        }
    }

    pub fn feed_line(&mut self, line: &str) {
        match self {
            Self::OpenAiChat(inner) => inner.feed_line(line),
            Self::OpenAiResponses(inner) => inner.feed_line(line),
            Self::Anthropic(inner) => inner.feed_line(line),
            Self::Gemini(inner) => inner.feed_line(line),
        }
    }

    pub fn feed_frame(&mut self, frame: &Frame) {
        match self {
            Self::OpenAiChat(inner) => inner.feed_frame(frame),
            Self::OpenAiResponses(inner) => inner.feed_frame(frame),
            Self::Anthropic(inner) => inner.feed_frame(frame),
            Self::Gemini(inner) => inner.feed_frame(frame),
        }
    }

    #[must_use]
    pub fn finish(self) -> Aggregated {
        match self {
            Self::OpenAiChat(inner) => inner.finish(),
            Self::OpenAiResponses(inner) => inner.finish(),
            Self::Anthropic(inner) => inner.finish(),
            Self::Gemini(inner) => inner.finish(),
        }
    }
}

/// Aggregate fully-buffered text with an explicit schema.
#[must_use]
pub fn aggregate_with<S: DialectSchema>(schema: &S, raw: &str) -> Aggregated {
    let mut state = AggregationState::new();
    for frame in split_frames(raw) {
        fold_frame(schema, &mut state, &frame);
    }
    finalize(schema, state)
}

#[must_use]
pub fn aggregate(dialect: Dialect, raw: &str) -> Aggregated {
    match dialect {
        Dialect::OpenAiChat => aggregate_openai_chat(raw),
        Dialect::OpenAiResponses => aggregate_openai_responses(raw),
        Dialect::Anthropic => aggregate_anthropic(raw),
        Dialect::Gemini => aggregate_gemini(raw),
    }
}

#[must_use]
pub fn aggregate_openai_chat(raw: &str) -> Aggregated {
    aggregate_with(&OpenAiChatSchema, raw)
}

#[must_use]
pub fn aggregate_openai_responses(raw: &str) -> Aggregated {
    aggregate_with(&OpenAiResponsesSchema, raw)
}

#[must_use]
pub fn aggregate_anthropic(raw: &str) -> Aggregated {
    aggregate_with(&AnthropicSchema, raw)
}

#[must_use]
pub fn aggregate_gemini(raw: &str) -> Aggregated {
    aggregate_with(&GeminiSchema, raw)
}

/// Aggregate from an iterator of lines (terminators stripped).
pub fn aggregate_lines<I, L>(dialect: Dialect, lines: I) -> Aggregated
where
    I: IntoIterator<Item = L>,
    L: AsRef<str>,
{
    let mut aggregator = Aggregator::new(dialect);
    for line in lines {
        aggregator.feed_line(line.as_ref());
    }
    aggregator.finish()
}

/// Aggregate an async byte stream (e.g. an HTTP body or a file reader).
///
/// The first source error aborts the conversion and is returned as-is.
pub async fn aggregate_stream<St, E>(dialect: Dialect, byte_stream: St) -> Result<Aggregated, E>
where
    St: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let frames = frame_stream(byte_stream);
    futures_util::pin_mut!(frames);
    let mut aggregator = Aggregator::new(dialect);
    while let Some(frame) = frames.next().await {
        aggregator.feed_frame(&frame?);
    }
    Ok(aggregator.finish())
}
