//! Span payload codecs
//!
//! The fact table stores each span as an opaque blob. The write path never
//! looks inside it; it only needs something that turns a [`Span`] into bytes
//! and back. Pick the codec when building the consumer:
//!
//! | Codec | Format | Notes |
//! |-------|--------|-------|
//! | [`JsonCodec`] | JSON | Human-readable, larger |
//! | [`MsgPackCodec`] | MessagePack | Compact, default |

use crate::error::Result;
use crate::span::Span;

/// Converts spans to and from their stored representation.
pub trait SpanCodec: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode one span.
    fn encode(&self, span: &Span) -> Result<Vec<u8>>;

    /// Decode one span.
    fn decode(&self, bytes: &[u8]) -> Result<Span>;

    /// Encode a list of spans, as producers send them.
    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>>;

    /// Decode a list of spans.
    fn decode_list(&self, bytes: &[u8]) -> Result<Vec<Span>>;
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl SpanCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, span: &Span) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(span)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Span> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(spans)?)
    }

    fn decode_list(&self, bytes: &[u8]) -> Result<Vec<Span>> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// MessagePack codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl SpanCodec for MsgPackCodec {
    fn name(&self) -> &'static str {
        "msgpack"
    }

    fn encode(&self, span: &Span) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(span)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Span> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    fn encode_list(&self, spans: &[Span]) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(spans)?)
    }

    fn decode_list(&self, bytes: &[u8]) -> Result<Vec<Span>> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
