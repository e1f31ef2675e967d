use serde_json::Value;
use smallvec::SmallVec;
use tracing::debug;

use super::state::Counters;
use crate::stream::{Frame, DONE_SENTINEL};

pub(crate) type Payloads = SmallVec<[Value; 1]>;

/// Decode one frame's data into JSON payloads.
///
/// A frame normally decodes to exactly one value. When a multi-line payload
/// does not parse as a whole, each data line is decoded on its own so that
/// `data:` lines written without blank separators are still recovered; every
/// line that still fails counts one parse error. A single-line frame that
/// fails counts exactly one.
pub(crate) fn decode_frame(frame: &Frame, counters: &mut Counters) -> Payloads {
    let mut out = Payloads::new();
    match serde_json::from_str::<Value>(&frame.data) {
        Ok(value) => out.push(value),
        Err(err) if frame.is_multi_line() => {
            debug!(
                event = frame.event.as_deref().unwrap_or(""),
                error = %err,
                "multi-line payload failed to decode, retrying line by line"
            );
            for line in frame.data_lines() {
                let line = line.trim();
                if line.is_empty() || line == DONE_SENTINEL {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => out.push(value),
                    Err(err) => {
                        counters.parse_error_count += 1;
                        debug!(error = %err, "dropping undecodable payload line");
                    }
                }
            }
        }
        Err(err) => {
            counters.parse_error_count += 1;
            debug!(
                event = frame.event.as_deref().unwrap_or(""),
                error = %err,
                "dropping undecodable payload"
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_single_payload() {
        let mut counters = Counters::default();
        let out = decode_frame(&Frame::new(None, r#"{"a":1}"#), &mut counters);
        assert_eq!(out.as_slice(), &[json!({"a": 1})]);
        assert_eq!(counters.parse_error_count, 0);
    }

    #[test]
    fn test_decode_single_line_failure_counts_once() {
        let mut counters = Counters::default();
        let out = decode_frame(&Frame::new(None, "{not json"), &mut counters);
        assert!(out.is_empty());
        assert_eq!(counters.parse_error_count, 1);
    }

    #[test]
    fn test_decode_multi_line_json_as_whole() {
        let mut counters = Counters::default();
        let out = decode_frame(&Frame::new(None, "{\"a\":\n1}"), &mut counters);
        assert_eq!(out.as_slice(), &[json!({"a": 1})]);
        assert_eq!(counters.parse_error_count, 0);
    }

    #[test]
    fn test_decode_line_fallback_recovers_each_line() {
        let mut counters = Counters::default();
        let out = decode_frame(
            &Frame::new(None, "{\"n\":1}\n{broken\n{\"n\":2}\n[DONE]"),
            &mut counters,
        );
        assert_eq!(out.as_slice(), &[json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(counters.parse_error_count, 1);
    }
}
