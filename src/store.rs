//! Main entry point for spanstore.
//!
//! [`SpanStore`] ties a session, a consumer and a codec together. Workers
//! call [`SpanStore::ingester`] once each and feed batches through it.

use spanstore_core::{Error, MsgPackCodec, Result, Span, SpanCodec};
use spanstore_engine::{
    Clock, ConsumerConfig, MetricsSnapshot, SpanConsumer, SpanIngester, SystemClock,
};
use spanstore_storage::{MemorySession, Session};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Keyspace of stores built without a session.
pub const DEFAULT_KEYSPACE: &str = "zipkin";

/// A span store.
///
/// # Example
///
/// ```ignore
/// use spanstore::prelude::*;
///
/// let store = SpanStore::ephemeral()?;
/// let mut ingester = store.ingester();
///
/// let span = Span::new(1, 1, "get").with_timestamp(1_500_000_000_000_000);
/// ingester.accept(vec![span]).await?;
/// ```
pub struct SpanStore {
    consumer: Arc<SpanConsumer>,
    session: Arc<dyn Session>,
    memory: Option<Arc<MemorySession>>,
    codec: Arc<dyn SpanCodec>,
}

impl SpanStore {
    /// Store writing through `session` with default settings.
    pub fn open(session: Arc<dyn Session>) -> Result<Self> {
        Self::builder().session(session).open()
    }

    /// Store backed by an in-memory session.
    ///
    /// Rows can be inspected through [`SpanStore::memory`].
    pub fn ephemeral() -> Result<Self> {
        Self::builder().open()
    }

    /// Builder for store configuration.
    pub fn builder() -> SpanStoreBuilder {
        SpanStoreBuilder::new()
    }

    /// A new worker with its own dedup cache.
    pub fn ingester(&self) -> SpanIngester {
        self.consumer.ingester()
    }

    /// The shared consumer.
    pub fn consumer(&self) -> &Arc<SpanConsumer> {
        &self.consumer
    }

    /// Session rows are written through.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// The in-memory session, when the store was built without one.
    pub fn memory(&self) -> Option<&Arc<MemorySession>> {
        self.memory.as_ref()
    }

    /// Codec used for fact rows and for producer payloads.
    pub fn codec(&self) -> &Arc<dyn SpanCodec> {
        &self.codec
    }

    /// Decode a producer message into the spans it carries.
    ///
    /// Producers acknowledge a message only once the batch built from it has
    /// been accepted successfully.
    pub fn decode_message(&self, message: &[u8]) -> Result<Vec<Span>> {
        self.codec.decode_list(message)
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.consumer.metrics()
    }
}

impl std::fmt::Debug for SpanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanStore")
            .field("keyspace", &self.session.keyspace())
            .field("codec", &self.codec.name())
            .field("ephemeral", &self.memory.is_some())
            .finish()
    }
}

/// Builder for [`SpanStore`].
///
/// ```ignore
/// // Production: real session, config from disk
/// let store = SpanStore::builder()
///     .session(session)
///     .config_file("/etc/spanstore/consumer.toml")
///     .open()?;
///
/// // Tests: in-memory, deterministic buckets and clock
/// let store = SpanStore::builder()
///     .clock(clock)
///     .bucket_seed(7)
///     .open()?;
/// ```
pub struct SpanStoreBuilder {
    session: Option<Arc<dyn Session>>,
    keyspace: String,
    config: ConsumerConfig,
    config_file: Option<PathBuf>,
    codec: Arc<dyn SpanCodec>,
    clock: Arc<dyn Clock>,
    bucket_seed: Option<u64>,
}

impl SpanStoreBuilder {
    /// Defaults: in-memory session, default config, MessagePack, system clock.
    pub fn new() -> Self {
        Self {
            session: None,
            keyspace: DEFAULT_KEYSPACE.to_string(),
            config: ConsumerConfig::default(),
            config_file: None,
            codec: Arc::new(MsgPackCodec),
            clock: Arc::new(SystemClock),
            bucket_seed: None,
        }
    }

    /// Write through `session` instead of memory.
    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Keyspace of the in-memory session. Ignored with an explicit session.
    pub fn keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Use `config`.
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a TOML file at open time. Overrides
    /// [`config`](Self::config).
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Span codec.
    pub fn codec(mut self, codec: Arc<dyn SpanCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Clock for dedup windows.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Seed random bucket placement.
    pub fn bucket_seed(mut self, seed: u64) -> Self {
        self.bucket_seed = Some(seed);
        self
    }

    /// Build the store.
    pub fn open(self) -> Result<SpanStore> {
        let config = match &self.config_file {
            Some(path) => ConsumerConfig::load(path).map_err(|e| match e {
                Error::Io(io) => Error::Config(format!("{}: {}", path.display(), io)),
                other => other,
            })?,
            None => self.config,
        };

        let (session, memory) = match self.session {
            Some(session) => (session, None),
            None => {
                let memory = Arc::new(MemorySession::new(self.keyspace));
                (Arc::clone(&memory) as Arc<dyn Session>, Some(memory))
            }
        };

        let mut consumer = SpanConsumer::builder(Arc::clone(&session))
            .config(config)
            .codec(Arc::clone(&self.codec))
            .clock(self.clock);
        if let Some(seed) = self.bucket_seed {
            consumer = consumer.bucket_seed(seed);
        }

        let consumer = consumer.build()?;
        info!(
            keyspace = session.keyspace(),
            codec = self.codec.name(),
            ephemeral = memory.is_some(),
            "span store opened"
        );
        Ok(SpanStore {
            consumer,
            session,
            memory,
            codec: self.codec,
        })
    }
}

impl Default for SpanStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
