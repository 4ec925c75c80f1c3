//! Span model
//!
//! A [`Span`] is one timed operation within a trace. Spans carry two kinds of
//! annotations:
//!
//! - [`Annotation`]: a timestamped event (`"cs"`, `"sr"`, `"cache.miss"`, ...)
//! - [`BinaryAnnotation`]: a tagged key/value pair (`"http.path" = "/users"`)
//!
//! Both may name the [`Endpoint`] that recorded them; the endpoint's service
//! name is what the indexes are keyed by.

use serde::{Deserialize, Serialize};

/// Client send
pub const CLIENT_SEND: &str = "cs";
/// Client receive
pub const CLIENT_RECV: &str = "cr";
/// Server send
pub const SERVER_SEND: &str = "ss";
/// Server receive
pub const SERVER_RECV: &str = "sr";
/// Wire send
pub const WIRE_SEND: &str = "ws";
/// Wire receive
pub const WIRE_RECV: &str = "wr";
/// Client send fragment
pub const CLIENT_SEND_FRAGMENT: &str = "csf";
/// Client receive fragment
pub const CLIENT_RECV_FRAGMENT: &str = "crf";
/// Server send fragment
pub const SERVER_SEND_FRAGMENT: &str = "ssf";
/// Server receive fragment
pub const SERVER_RECV_FRAGMENT: &str = "srf";

/// Annotation values that mark RPC lifecycle events.
///
/// Every RPC span has them, so they are useless as lookup keys.
pub const CORE_ANNOTATIONS: [&str; 10] = [
    CLIENT_SEND,
    CLIENT_RECV,
    SERVER_SEND,
    SERVER_RECV,
    WIRE_SEND,
    WIRE_RECV,
    CLIENT_SEND_FRAGMENT,
    CLIENT_RECV_FRAGMENT,
    SERVER_SEND_FRAGMENT,
    SERVER_RECV_FRAGMENT,
];

/// Network context of the service that recorded an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Lowercase service name, possibly empty
    pub service_name: String,
    /// IPv4 address packed big-endian, 0 if unknown
    pub ipv4: u32,
    /// Port, if known
    pub port: Option<u16>,
}

impl Endpoint {
    /// Create an endpoint. The service name is lowercased.
    pub fn new(service_name: impl AsRef<str>, ipv4: u32, port: Option<u16>) -> Self {
        Self {
            service_name: service_name.as_ref().to_lowercase(),
            ipv4,
            port,
        }
    }

    /// Create an endpoint with only a service name.
    pub fn service(service_name: impl AsRef<str>) -> Self {
        Self::new(service_name, 0, None)
    }
}

/// A timestamped event within a span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Annotation {
    /// Microseconds since epoch
    pub timestamp: i64,
    /// Event name
    pub value: String,
    /// Recording endpoint
    pub endpoint: Option<Endpoint>,
}

impl Annotation {
    /// Create an annotation.
    pub fn new(timestamp: i64, value: impl Into<String>, endpoint: Option<Endpoint>) -> Self {
        Self {
            timestamp,
            value: value.into(),
            endpoint,
        }
    }
}

/// Type tag of a binary annotation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnnotationType {
    /// Single byte, 0 or 1
    Bool,
    /// Opaque bytes
    Bytes,
    /// Big-endian i16
    I16,
    /// Big-endian i32
    I32,
    /// Big-endian i64
    I64,
    /// Big-endian IEEE 754 double
    Double,
    /// UTF-8 string
    String,
}

impl AnnotationType {
    /// Wire value of the type tag.
    pub fn code(&self) -> u8 {
        match self {
            AnnotationType::Bool => 0,
            AnnotationType::Bytes => 1,
            AnnotationType::I16 => 2,
            AnnotationType::I32 => 3,
            AnnotationType::I64 => 4,
            AnnotationType::Double => 5,
            AnnotationType::String => 6,
        }
    }
}

/// A tagged key/value pair attached to a span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryAnnotation {
    /// Annotation key
    pub key: String,
    /// Raw value bytes, interpreted according to `annotation_type`
    pub value: Vec<u8>,
    /// Type tag
    pub annotation_type: AnnotationType,
    /// Recording endpoint
    pub endpoint: Option<Endpoint>,
}

impl BinaryAnnotation {
    /// Create a binary annotation.
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        annotation_type: AnnotationType,
        endpoint: Option<Endpoint>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            annotation_type,
            endpoint,
        }
    }

    /// Create a string-typed binary annotation.
    pub fn string(key: impl Into<String>, value: &str, endpoint: Option<Endpoint>) -> Self {
        Self::new(key, value.as_bytes().to_vec(), AnnotationType::String, endpoint)
    }
}

/// One timed operation within a trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Trace this span belongs to
    pub trace_id: u64,
    /// Span identifier, unique within the trace
    pub id: u64,
    /// Parent span, absent for the root
    pub parent_id: Option<u64>,
    /// Operation name, possibly empty
    pub name: String,
    /// Start, microseconds since epoch
    pub timestamp: Option<i64>,
    /// Duration in microseconds
    pub duration: Option<i64>,
    /// Timestamped events
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Key/value tags
    #[serde(default)]
    pub binary_annotations: Vec<BinaryAnnotation>,
}

impl Span {
    /// Create a span with no timing or annotations.
    pub fn new(trace_id: u64, id: u64, name: impl Into<String>) -> Self {
        Self {
            trace_id,
            id,
            parent_id: None,
            name: name.into(),
            timestamp: None,
            duration: None,
            annotations: Vec::new(),
            binary_annotations: Vec::new(),
        }
    }

    /// Set the parent span id.
    pub fn with_parent(mut self, parent_id: u64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Set the start timestamp.
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Append an annotation.
    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Append a binary annotation.
    pub fn tag(mut self, binary_annotation: BinaryAnnotation) -> Self {
        self.binary_annotations.push(binary_annotation);
        self
    }

    /// Endpoints of every annotation and binary annotation, in order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.annotations
            .iter()
            .filter_map(|a| a.endpoint.as_ref())
            .chain(
                self.binary_annotations
                    .iter()
                    .filter_map(|b| b.endpoint.as_ref()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_lowercases_service_name() {
        let ep = Endpoint::new("Frontend", 0x7f000001, Some(8080));
        assert_eq!(ep.service_name, "frontend");
        assert_eq!(ep.port, Some(8080));
    }

    #[test]
    fn test_span_builder() {
        let web = Endpoint::service("web");
        let span = Span::new(1, 2, "get")
            .with_parent(1)
            .with_timestamp(100)
            .with_duration(50)
            .annotate(Annotation::new(100, CLIENT_SEND, Some(web.clone())))
            .tag(BinaryAnnotation::string("http.path", "/users", Some(web)));

        assert_eq!(span.parent_id, Some(1));
        assert_eq!(span.timestamp, Some(100));
        assert_eq!(span.duration, Some(50));
        assert_eq!(span.annotations.len(), 1);
        assert_eq!(span.binary_annotations[0].value, b"/users");
        assert_eq!(span.endpoints().count(), 2);
    }

    #[test]
    fn test_annotation_type_codes_are_distinct() {
        let types = [
            AnnotationType::Bool,
            AnnotationType::Bytes,
            AnnotationType::I16,
            AnnotationType::I32,
            AnnotationType::I64,
            AnnotationType::Double,
            AnnotationType::String,
        ];
        let mut codes: Vec<u8> = types.iter().map(|t| t.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), types.len());
    }
}
