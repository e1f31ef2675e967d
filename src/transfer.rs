//! One entry point for every captured body: request, response or stream.

use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, info};

use crate::aggregate::{aggregate, Aggregated};
use crate::error::CanonicalError;
use crate::protocol::gemini::{is_wrapped, unwrap_request, unwrap_response};
use crate::protocol::Dialect;
use crate::routing::{is_event_stream, judge_dialect};

/// What a captured body is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Request,
    Response,
    /// A streamed (`text/event-stream`) response.
    Sse,
}

impl FromStr for TransferKind {
    type Err = CanonicalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "request" => Ok(Self::Request),
            "response" => Ok(Self::Response),
            "sse" | "stream" => Ok(Self::Sse),
            other => Err(CanonicalError::InvalidInput(format!(
                "unknown body kind '{other}', expected request, response or sse"
            ))),
        }
    }
}

/// Result of [`unified_transfer`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transferred {
    /// A JSON request or response body, normalized.
    Body(Value),
    /// An aggregated event stream.
    Stream(Aggregated),
}

impl Transferred {
    #[must_use]
    pub fn into_value(self, include_meta: bool) -> Value {
        match self {
            Self::Body(value) => value,
            Self::Stream(aggregated) => aggregated.into_output(include_meta),
        }
    }
}

/// Normalize one captured body.
///
/// Streams are aggregated and never fail. Request and response bodies must
/// be JSON; Gemini internal wrappers are peeled off.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidInput`] when a request or response body
/// is not valid JSON.
pub fn unified_transfer(
    dialect: Dialect,
    kind: TransferKind,
    text: &str,
) -> Result<Transferred, CanonicalError> {
    if kind == TransferKind::Sse {
        return Ok(Transferred::Stream(aggregate(dialect, text)));
    }

    let body: Value = serde_json::from_str(text)
        .map_err(|e| CanonicalError::InvalidInput(format!("{kind:?} body is not JSON: {e}")))?;
    if dialect != Dialect::Gemini {
        return Ok(Transferred::Body(body));
    }

    let body = match kind {
        TransferKind::Request if is_wrapped(&body, "request", "contents") => {
            info!("gemini internal request wrapper detected, body unwrapped");
            unwrap_request(body)
        }
        TransferKind::Response if is_wrapped(&body, "response", "candidates") => {
            info!("gemini internal response wrapper detected, body unwrapped");
            unwrap_response(body)
        }
        _ => body,
    };
    Ok(Transferred::Body(body))
}

/// One captured body together with the exchange metadata used to judge its
/// dialect.
#[derive(Debug, Clone, Copy)]
pub struct Capture<'a> {
    pub kind: TransferKind,
    pub request_path: &'a str,
    /// Response `Content-Type`, when it was captured.
    pub content_type: Option<&'a str>,
    pub body: &'a str,
}

/// Judge a captured body's dialect and normalize it with
/// [`unified_transfer`]. A response announced as `text/event-stream` is
/// aggregated as a stream.
///
/// # Errors
///
/// Returns [`CanonicalError::UnsupportedDialect`] when neither the path nor
/// the body shape identifies a dialect, and the errors of
/// [`unified_transfer`].
pub fn transfer_capture(capture: &Capture<'_>) -> Result<(Dialect, Transferred), CanonicalError> {
    let kind = match capture.kind {
        TransferKind::Response if capture.content_type.is_some_and(is_event_stream) => {
            TransferKind::Sse
        }
        kind => kind,
    };
    let body = match kind {
        TransferKind::Sse => None,
        _ => serde_json::from_str::<Value>(capture.body).ok(),
    };
    let dialect = judge_dialect(kind, capture.request_path, capture.content_type, body.as_ref())
        .ok_or_else(|| CanonicalError::UnsupportedDialect(capture.request_path.to_string()))?;
    debug!(%dialect, ?kind, path = capture.request_path, "captured body judged");
    Ok((dialect, unified_transfer(dialect, kind, capture.body)?))
}
