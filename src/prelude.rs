//! Convenient imports for spanstore.
//!
//! ```ignore
//! use spanstore::prelude::*;
//!
//! let store = SpanStore::ephemeral()?;
//! store.ingester().accept(vec![Span::new(1, 1, "get")]).await?;
//! ```

// Main entry point
pub use crate::store::{SpanStore, SpanStoreBuilder};

// Error handling
pub use spanstore_core::{Error, Result};

// Span model
pub use spanstore_core::{Annotation, AnnotationType, BinaryAnnotation, Endpoint, Span};

// Codecs
pub use spanstore_core::{JsonCodec, MsgPackCodec, SpanCodec};

// Write path
pub use spanstore_engine::{
    Clock, ConsumerConfig, ManualClock, MetricsSnapshot, SpanConsumer, SpanIngester, SystemClock,
};

// Store seam
pub use spanstore_storage::{MemorySession, Session, StoreError, Table, TableOptions};
