//! Timestamp and duration backfill
//!
//! Instrumentation often reports only annotations and leaves the span-level
//! `timestamp` and `duration` unset. The indexes are keyed by both, so they
//! are derived here before any row is built:
//!
//! - timestamp: the earliest annotation
//! - duration: `cr - cs` when the span has both client annotations, otherwise
//!   the distance between the first and last annotation
//!
//! Values set by the instrumentation are authoritative and never replaced.
//! A span that has no annotations keeps whatever it had.
//!
//! A single annotation is enough for the timestamp, so a partial span that
//! arrives alone is still indexed at that instant. The duration needs at
//! least two annotations and is left unset otherwise.

use crate::span::{Span, CLIENT_RECV, CLIENT_SEND};

/// Fill in a missing timestamp and duration from the span's annotations.
///
/// Annotations are sorted by timestamp as a side effect.
pub fn apply_timestamp_and_duration(mut span: Span) -> Span {
    span.annotations.sort_by_key(|a| a.timestamp);

    if span.timestamp.is_some() && span.duration.is_some() {
        return span;
    }

    let (first, last) = match (span.annotations.first(), span.annotations.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => return span,
    };

    if span.timestamp.is_none() {
        span.timestamp = Some(first);
    }

    if span.duration.is_none() && span.annotations.len() >= 2 {
        let duration = client_duration(&span).unwrap_or(last - first);
        if duration > 0 {
            span.duration = Some(duration);
        }
    }

    span
}

/// `cr - cs`, when both client annotations are present.
fn client_duration(span: &Span) -> Option<i64> {
    let find = |value: &str| {
        span.annotations
            .iter()
            .find(|a| a.value == value)
            .map(|a| a.timestamp)
    };
    match (find(CLIENT_SEND), find(CLIENT_RECV)) {
        (Some(send), Some(recv)) => Some(recv - send),
        _ => None,
    }
}
