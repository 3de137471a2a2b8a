use super::decoder::Frame;
use crate::state::Source;
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

/// Payload that ends a stream unconditionally.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A classified frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ContentDelta(String),
    SourceSet(Vec<Source>),
    Complete,
    StreamError(String),
}

/// Wire shape of a frame payload. Backends disagree on the delta field name,
/// so both spellings are read here and nowhere else.
#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
    #[serde(default)]
    sources: Option<Vec<Value>>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    error: Option<Value>,
}

/// Classifies one frame. `None` means the frame carries nothing usable and
/// should be skipped.
pub fn interpret(frame: &Frame) -> Option<Event> {
    let payload = frame.payload().trim();
    if payload == DONE_SENTINEL {
        return Some(Event::Complete);
    }

    let parsed: Payload = match serde_json::from_str(payload) {
        Ok(parsed) => parsed,
        Err(err) => {
            trace!(%err, "discarding malformed frame");
            return None;
        }
    };

    if let Some(delta) = parsed.content.or(parsed.chunk) {
        return Some(Event::ContentDelta(delta));
    }
    if let Some(sources) = parsed.sources {
        return Some(Event::SourceSet(valid_sources(sources)));
    }
    if parsed.done == Some(true) {
        return Some(Event::Complete);
    }
    match parsed.error {
        Some(Value::String(message)) => Some(Event::StreamError(message)),
        Some(Value::Null) | None => {
            trace!("discarding frame with unrecognised shape");
            None
        }
        Some(other) => Some(Event::StreamError(other.to_string())),
    }
}

/// Keeps the elements that parse as in-range sources, in order.
pub(crate) fn valid_sources(raw: Vec<Value>) -> Vec<Source> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value::<Source>(value) {
            Ok(source) if source.is_valid() => Some(source),
            Ok(source) => {
                trace!(filename = %source.filename, "dropping out-of-range source");
                None
            }
            Err(err) => {
                trace!(%err, "dropping malformed source");
                None
            }
        })
        .collect()
}
