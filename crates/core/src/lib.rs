//! Core types for spanstore
//!
//! This crate defines what a span is and everything computed from it before
//! any row is written:
//! - [`Span`] and its annotations
//! - [`apply_timestamp_and_duration`]: timing backfill from annotations
//! - [`service_names`], [`annotation_keys`], [`uniqueness_key`]: index keys
//! - [`SpanCodec`]: pluggable payload encoding
//! - [`Error`]: the error type shared by every spanstore crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod keys;
pub mod normalize;
pub mod span;

pub use codec::{JsonCodec, MsgPackCodec, SpanCodec};
pub use error::{BoxError, Error, Result};
pub use keys::{annotation_keys, service_names, uniqueness_key, ServiceNames};
pub use normalize::apply_timestamp_and_duration;
pub use span::{Annotation, AnnotationType, BinaryAnnotation, Endpoint, Span, CORE_ANNOTATIONS};
