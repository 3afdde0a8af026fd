use std::sync::Arc;
use std::time::Duration;

use super::{ByteSource, Capabilities, ReadFuture};
use crate::ProbeError;

/// In-memory source with optional artificial latency.
///
/// Latency plus random jitter lets tests shuffle the order in which
/// overlapping reads complete.
#[derive(Clone)]
pub struct MemorySource {
    id: String,
    data: Arc<[u8]>,
    latency: Duration,
    jitter: Duration,
    failure: Option<String>,
}

impl MemorySource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: "mem:".to_owned(),
            data: data.into(),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            failure: None,
        }
    }

    /// Source of `length` bytes following a fixed pattern, so the content at
    /// any offset can be recomputed with [`MemorySource::pattern_byte`].
    pub fn patterned(length: usize) -> Self {
        let data: Vec<u8> =
            (0..length as u64).map(Self::pattern_byte).collect();
        Self::new(data).with_id(format!("mem:{length}"))
    }

    pub fn pattern_byte(offset: u64) -> u8 {
        (offset % 251) as u8
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Add up to `jitter` of random delay on top of the fixed latency.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Make every read fail with a transport error carrying `reason`.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    fn delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.latency;
        }
        self.latency + Duration::from_millis(fastrand::u64(0..=jitter_ms))
    }
}

impl ByteSource for MemorySource {
    fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READABLE | Capabilities::SEEKABLE
    }

    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
        let delay = self.delay();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(reason) = &self.failure {
                return Err(ProbeError::Transport(reason.clone()));
            }

            let size = self.data.len() as u64;
            let start = offset.min(size);
            let end = offset.saturating_add(length).min(size);
            Ok(self.data[start as usize..end as usize].to_vec())
        })
    }

    fn source_id(&self) -> &str {
        &self.id
    }
}
