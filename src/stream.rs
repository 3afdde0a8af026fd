//! Seekable, asynchronously readable byte stream over a [`ByteSource`].
//!
//! # State machine
//!
//! A stream is `Open` until [`ByteStream::close`], then `Closed` for good.
//! The cursor always stays within `[0, length]`:
//!
//! * seeking past the end clamps to the end and succeeds, also after close;
//! * seeking to a negative offset fails with an invalid-argument error,
//!   keeps the cursor where it was, and poisons the stream so that every
//!   later read completes with an invalid-argument status;
//! * a read reserves `min(requested, length - position)` bytes starting at
//!   the cursor and advances the cursor by that amount immediately, so
//!   overlapping reads cover consecutive ranges and a seek issued while a
//!   read is in flight does not change what the read returns;
//! * a read at the end completes successfully with zero bytes;
//! * a source that delivers fewer bytes than reserved does not give the
//!   difference back: the cursor stays advanced and `bytes_read` is short.
//!
//! A read stays pending until its handle is finalized or dropped, whichever
//! stream the handle was handed to.
//!
//! Completions are delivered on the platform runtime's worker threads. The
//! driving thread only blocks in [`ByteStream::end_read`].

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::operation::{
    OperationId, PendingSet, ReadCompletion, ReadHandle, ReadOperation,
};
use crate::source::{ByteSource, Capabilities};
use crate::{platform, ProbeError, Result, Status};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Open,
    Closed,
}

struct StreamState {
    position: u64,
    lifecycle: Lifecycle,
    poisoned: bool,
    pending: HashSet<OperationId>,
}

impl PendingSet for Mutex<StreamState> {
    fn release(&self, id: OperationId) {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .remove(&id);
    }
}

pub struct ByteStream {
    id: u64,
    source: Arc<dyn ByteSource>,
    length: u64,
    capabilities: Capabilities,
    state: Arc<Mutex<StreamState>>,
    cancel: CancellationToken,
    runtime: Handle,
}

impl ByteStream {
    /// Open a stream over `source`. Requires a started platform.
    pub fn new(source: Arc<dyn ByteSource>) -> Result<Self> {
        let runtime = platform::handle()?;
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let length = source.total_size();
        let capabilities = source.capabilities();
        log::debug!(
            "stream/{}: opened {} length={} caps={:#x}",
            id,
            source.source_id(),
            length,
            capabilities.bits()
        );

        Ok(Self {
            id,
            source,
            length,
            capabilities,
            state: Arc::new(Mutex::new(StreamState {
                position: 0,
                lifecycle: Lifecycle::Open,
                poisoned: false,
                pending: HashSet::new(),
            })),
            cancel: CancellationToken::new(),
            runtime,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    /// Length of the stream, established when it was opened.
    ///
    /// After [`ByteStream::close`] the value is still returned, but callers
    /// should treat it as unreliable: other stream implementations report
    /// garbage here once closed.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Capabilities are fixed at creation and survive closing.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state().lifecycle
    }

    pub fn is_poisoned(&self) -> bool {
        self.state().poisoned
    }

    pub fn position(&self) -> u64 {
        self.state().position
    }

    /// Number of reads begun but not yet finalized.
    pub fn pending_reads(&self) -> usize {
        self.state().pending.len()
    }

    /// Whether the cursor sits at the end. Also answers after close.
    pub fn is_end_of_stream(&self) -> bool {
        self.state().position == self.length
    }

    /// Move the cursor.
    ///
    /// Targets past the end clamp to the end. A negative target fails and
    /// poisons the stream for every later read.
    pub fn set_position(&self, target: i64) -> Result<()> {
        let mut state = self.state();
        if target < 0 {
            state.poisoned = true;
            log::warn!(
                "stream/{}: negative seek to {}, stream poisoned",
                self.id,
                target
            );
            return Err(ProbeError::InvalidArgument(format!(
                "seek target {target} is negative"
            )));
        }

        let clamped = (target as u64).min(self.length);
        if clamped != target as u64 {
            log::debug!(
                "stream/{}: seek to {} clamped to {}",
                self.id,
                target,
                clamped
            );
        }
        state.position = clamped;
        Ok(())
    }

    /// Start an asynchronous read of `length` bytes into `buffer`.
    ///
    /// Returns as soon as the read is scheduled. The transfer starts at the
    /// current cursor, which advances by the number of bytes that will be
    /// transferred. Finalize the read with [`ByteStream::end_read`].
    pub fn begin_read(
        &self,
        buffer: Vec<u8>,
        length: usize,
    ) -> Result<ReadHandle> {
        if buffer.len() < length {
            return Err(ProbeError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold a read of {}",
                buffer.len(),
                length
            )));
        }

        let mut state = self.state();
        if state.lifecycle == Lifecycle::Closed {
            return Err(ProbeError::Closed);
        }

        let offset = state.position;
        let poisoned = state.poisoned;
        let transfer = if poisoned {
            0
        } else {
            (length as u64).min(self.length - offset)
        };

        let (mut handle, completer) =
            ReadOperation::create(self.id, offset, length, buffer);
        let pending: Weak<dyn PendingSet> = Arc::<Mutex<StreamState>>::downgrade(&self.state);
        handle.track_in(pending);
        state.position = offset + transfer;
        state.pending.insert(handle.id());
        handle.mark_pending();
        drop(state);

        log::debug!(
            "stream/{}: read/{} begun offset={} requested={} transfer={}",
            self.id,
            handle.id(),
            offset,
            length,
            transfer
        );

        let source = self.source.clone();
        let cancel = self.cancel.clone();
        self.runtime.spawn(async move {
            if poisoned {
                completer.complete(Status::InvalidArgument, Vec::new());
                return;
            }
            if transfer == 0 {
                completer.complete(Status::Ok, Vec::new());
                return;
            }

            tokio::select! {
                biased;
                result = source.read_range(offset, transfer) => match result {
                    Ok(mut data) => {
                        if (data.len() as u64) < transfer {
                            log::warn!(
                                "read/{}: source delivered {} of {} bytes",
                                completer.id(),
                                data.len(),
                                transfer
                            );
                        }
                        data.truncate(transfer as usize);
                        completer.complete(Status::Ok, data);
                    }
                    Err(err) => {
                        log::warn!(
                            "read/{}: transport failed: {}",
                            completer.id(),
                            err
                        );
                        completer.complete((&err).into(), Vec::new());
                    }
                },
                _ = cancel.cancelled() => {
                    completer.complete(Status::Closed, Vec::new());
                }
            }
        });

        Ok(handle)
    }

    /// Finalize a read, blocking until it has completed.
    ///
    /// A handle begun on another stream is rejected and released from that
    /// stream's pending reads. Must not be called from one of the platform
    /// runtime's workers.
    pub fn end_read(&self, handle: ReadHandle) -> Result<ReadCompletion> {
        if handle.stream_id() != self.id {
            return Err(ProbeError::InvalidArgument(format!(
                "read {} belongs to stream {}, not {}",
                handle.id(),
                handle.stream_id(),
                self.id
            )));
        }

        let id = handle.id();
        let completion = handle.finalize()?;
        log::debug!(
            "stream/{}: read/{} finalized status={} bytes={}",
            self.id,
            id,
            completion.status,
            completion.bytes_read
        );
        Ok(completion)
    }

    /// Begin a read and wait for it.
    pub fn read(&self, length: usize) -> Result<ReadCompletion> {
        let handle = self.begin_read(vec![0; length], length)?;
        self.end_read(handle)
    }

    /// Close the stream. Reads still in flight complete with whatever the
    /// transport delivered first, or with [`Status::Closed`].
    pub fn close(&self) {
        let mut state = self.state();
        if state.lifecycle == Lifecycle::Closed {
            return;
        }
        state.lifecycle = Lifecycle::Closed;
        let outstanding = state.pending.len();
        drop(state);

        self.cancel.cancel();
        log::debug!(
            "stream/{}: closed with {} reads outstanding",
            self.id,
            outstanding
        );
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ByteStream")
            .field("id", &self.id)
            .field("source_id", &self.source_id())
            .field("length", &self.length)
            .field("position", &state.position)
            .field("lifecycle", &state.lifecycle)
            .finish()
    }
}

impl Drop for ByteStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ReadState;
    use crate::source::{MemorySource, ReadFuture};
    use rstest::rstest;
    use std::time::Duration;

    const LENGTH: u64 = 1000;

    fn stream_with(source: MemorySource) -> ByteStream {
        platform::startup().unwrap();
        ByteStream::new(Arc::new(source)).unwrap()
    }

    fn stream() -> ByteStream {
        stream_with(MemorySource::patterned(LENGTH as usize))
    }

    fn slow_stream(latency_ms: u64) -> ByteStream {
        stream_with(
            MemorySource::patterned(LENGTH as usize)
                .with_latency(Duration::from_millis(latency_ms)),
        )
    }

    #[rstest]
    #[case(0, 0)]
    #[case(500, 500)]
    #[case(1000, 1000)]
    #[case(1001, 1000)]
    #[case(2000, 1000)]
    #[case(i64::MAX, 1000)]
    fn seek_clamps_to_length(#[case] target: i64, #[case] expected: u64) {
        let stream = stream();
        stream.set_position(target).unwrap();
        assert_eq!(stream.position(), expected);
        assert_eq!(stream.is_end_of_stream(), expected == LENGTH);
    }

    #[rstest]
    #[case(990, 20, 10)]
    #[case(970, 10, 10)]
    #[case(999, 1, 1)]
    #[case(1000, 10, 0)]
    #[case(0, 0, 0)]
    fn read_is_clamped_at_end(
        #[case] start: i64,
        #[case] requested: usize,
        #[case] expected: usize,
    ) {
        let stream = stream();
        stream.set_position(start).unwrap();
        let completion = stream.read(requested).unwrap();
        assert_eq!(completion.status, Status::Ok);
        assert_eq!(completion.bytes_read, expected);
        assert_eq!(stream.position(), start as u64 + expected as u64);
        let from = start as u64;
        let expected_data: Vec<u8> = (from..from + expected as u64)
            .map(MemorySource::pattern_byte)
            .collect();
        assert_eq!(completion.data(), expected_data.as_slice());
    }

    #[test]
    fn read_at_end_leaves_position() {
        let stream = stream();
        stream.set_position(2 * LENGTH as i64).unwrap();
        assert!(stream.is_end_of_stream());
        let completion = stream.read(10).unwrap();
        assert_eq!(completion.status, Status::Ok);
        assert_eq!(completion.bytes_read, 0);
        assert_eq!(stream.position(), LENGTH);
        assert!(stream.is_end_of_stream());
    }

    #[test]
    fn overlapping_reads_complete_independently() {
        let stream = stream_with(
            MemorySource::patterned(LENGTH as usize)
                .with_jitter(Duration::from_millis(30)),
        );
        stream.set_position(100).unwrap();
        let first = stream.begin_read(vec![0; 10], 10).unwrap();
        let second = stream.begin_read(vec![0; 10], 10).unwrap();
        assert_eq!(stream.pending_reads(), 2);
        assert_eq!(first.offset(), 100);
        assert_eq!(second.offset(), 110);

        let first = stream.end_read(first).unwrap();
        assert_eq!(stream.pending_reads(), 1);
        assert!(matches!(
            second.state(),
            ReadState::Pending | ReadState::Completed
        ));
        let second = stream.end_read(second).unwrap();
        assert_eq!(stream.pending_reads(), 0);

        assert_eq!(first.status, Status::Ok);
        assert_eq!(second.status, Status::Ok);
        assert_eq!(first.bytes_read, 10);
        assert_eq!(second.bytes_read, 10);
        assert_eq!(first.data()[0], MemorySource::pattern_byte(100));
        assert_eq!(second.data()[0], MemorySource::pattern_byte(110));
        assert_eq!(stream.position(), 120);
    }

    #[test]
    fn finalize_in_reverse_order() {
        let stream = slow_stream(10);
        let first = stream.begin_read(vec![0; 4], 4).unwrap();
        let second = stream.begin_read(vec![0; 4], 4).unwrap();
        let second = stream.end_read(second).unwrap();
        let first = stream.end_read(first).unwrap();
        assert_eq!(first.data(), &[0, 1, 2, 3]);
        assert_eq!(second.data(), &[4, 5, 6, 7]);
    }

    #[test]
    fn seek_racing_read_uses_captured_position() {
        let stream = slow_stream(30);
        stream.set_position(200).unwrap();
        let handle = stream.begin_read(vec![0; 10], 10).unwrap();
        stream.set_position(250).unwrap();
        assert_eq!(stream.position(), 250);

        let completion = stream.end_read(handle).unwrap();
        assert_eq!(completion.status, Status::Ok);
        assert_eq!(completion.bytes_read, 10);
        assert_eq!(completion.data()[0], MemorySource::pattern_byte(200));
        assert_eq!(stream.position(), 250);
    }

    #[test]
    fn negative_seek_poisons_reads() {
        let stream = stream();
        stream.set_position(40).unwrap();
        let err = stream.set_position(-100).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidArgument(_)));
        assert_eq!(stream.position(), 40);
        assert!(stream.is_poisoned());

        for requested in [0, 10, 190] {
            let completion = stream.read(requested).unwrap();
            assert_eq!(completion.status, Status::InvalidArgument);
            assert_eq!(completion.bytes_read, 0);
            assert_eq!(stream.position(), 40);
        }

        // seeking still works, reading still does not
        stream.set_position(LENGTH as i64 - 10).unwrap();
        assert_eq!(stream.position(), LENGTH - 10);
        let completion = stream.read(20).unwrap();
        assert_eq!(completion.status, Status::InvalidArgument);
    }

    #[test]
    fn close_completes_outstanding_read() {
        let stream = slow_stream(5_000);
        let handle = stream.begin_read(vec![0; 100], 100).unwrap();
        stream.close();
        assert_eq!(stream.lifecycle(), Lifecycle::Closed);

        assert!(handle.wait_timeout(Duration::from_secs(2)).unwrap());
        let completion = stream.end_read(handle).unwrap();
        assert_eq!(completion.status, Status::Closed);
        assert_eq!(completion.bytes_read, 0);
        assert_eq!(stream.pending_reads(), 0);
    }

    #[test]
    fn completed_read_survives_close() {
        let stream = stream();
        let handle = stream.begin_read(vec![0; 8], 8).unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(2)).unwrap());
        stream.close();
        let completion = stream.end_read(handle).unwrap();
        assert_eq!(completion.status, Status::Ok);
        assert_eq!(completion.bytes_read, 8);
    }

    #[test]
    fn closed_stream_keeps_answering_queries() {
        let stream = stream();
        stream.set_position(500).unwrap();
        let caps = stream.capabilities();
        stream.close();
        stream.close();

        assert_eq!(stream.capabilities(), caps);
        assert!(!stream.is_end_of_stream());
        stream.set_position(5000).unwrap();
        assert_eq!(stream.position(), LENGTH);
        assert!(stream.is_end_of_stream());
        stream.set_position(100).unwrap();
        assert_eq!(stream.position(), 100);

        let err = stream.begin_read(vec![0; 20], 20).unwrap_err();
        assert!(matches!(err, ProbeError::Closed));
    }

    #[test]
    fn transport_failure_is_reported_verbatim() {
        let stream = stream_with(
            MemorySource::patterned(LENGTH as usize).failing("connection reset"),
        );
        let completion = stream.read(10).unwrap();
        assert_eq!(
            completion.status,
            Status::Transport("Transport error: connection reset".into())
        );
        assert_eq!(completion.bytes_read, 0);
        // the range was reserved when the read began
        assert_eq!(stream.position(), 10);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let stream = stream();
        let err = stream.begin_read(vec![0; 4], 8).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidArgument(_)));
        assert_eq!(stream.pending_reads(), 0);
    }

    #[test]
    fn handle_from_other_stream_is_rejected() {
        let a = stream();
        let b = stream();
        let handle = a.begin_read(vec![0; 4], 4).unwrap();
        assert_eq!(a.pending_reads(), 1);
        let err = b.end_read(handle).unwrap_err();
        assert!(matches!(err, ProbeError::InvalidArgument(_)));
        assert_eq!(a.pending_reads(), 0);
        assert_eq!(b.pending_reads(), 0);
    }

    #[test]
    fn dropped_handle_leaves_pending_set() {
        let stream = slow_stream(20);
        let kept = stream.begin_read(vec![0; 4], 4).unwrap();
        let dropped = stream.begin_read(vec![0; 4], 4).unwrap();
        assert_eq!(stream.pending_reads(), 2);

        drop(dropped);
        assert_eq!(stream.pending_reads(), 1);
        stream.end_read(kept).unwrap();
        assert_eq!(stream.pending_reads(), 0);
        assert_eq!(stream.position(), 8);
    }

    #[test]
    fn handle_outliving_stream_is_harmless() {
        let stream = stream();
        let handle = stream.begin_read(vec![0; 4], 4).unwrap();
        drop(stream);
        drop(handle);
    }

    /// Serves a constant byte. Reads starting at `slow_offset` are held
    /// back and every read comes up `short_by` bytes short.
    struct ScriptedSource {
        slow_offset: Option<u64>,
        short_by: u64,
    }

    impl ByteSource for ScriptedSource {
        fn total_size(&self) -> u64 {
            LENGTH
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::READABLE | Capabilities::SEEKABLE
        }

        fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_> {
            let delay = if self.slow_offset == Some(offset) {
                Duration::from_millis(500)
            } else {
                Duration::ZERO
            };
            let delivered = length.saturating_sub(self.short_by) as usize;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ProbeError>(vec![7u8; delivered])
            })
        }

        fn source_id(&self) -> &str {
            "scripted"
        }
    }

    fn scripted(slow_offset: Option<u64>, short_by: u64) -> ByteStream {
        platform::startup().unwrap();
        ByteStream::new(Arc::new(ScriptedSource {
            slow_offset,
            short_by,
        }))
        .unwrap()
    }

    #[test]
    fn later_read_completes_first() {
        let stream = scripted(Some(0), 0);
        let first = stream.begin_read(vec![0; 10], 10).unwrap();
        let second = stream.begin_read(vec![0; 10], 10).unwrap();

        assert!(second.wait_timeout(Duration::from_secs(2)).unwrap());
        assert!(!first.is_completed());
        let second = stream.end_read(second).unwrap();
        assert_eq!(stream.pending_reads(), 1);

        let first = stream.end_read(first).unwrap();
        assert_eq!((first.status, first.bytes_read), (Status::Ok, 10));
        assert_eq!((second.status, second.bytes_read), (Status::Ok, 10));
        assert_eq!(stream.position(), 20);
    }

    #[test]
    fn short_delivery_keeps_cursor_advanced() {
        let stream = scripted(None, 4);
        let completion = stream.read(10).unwrap();
        assert_eq!(completion.status, Status::Ok);
        assert_eq!(completion.bytes_read, 6);
        assert_eq!(completion.data(), &[7u8; 6]);
        assert_eq!(stream.position(), 10);
    }

    #[test]
    fn debug_shows_cursor_and_lifecycle() {
        let stream = stream();
        stream.set_position(42).unwrap();
        stream.close();
        let debug = format!("{stream:?}");
        assert!(debug.contains("position: 42"));
        assert!(debug.contains("lifecycle: Closed"));
        assert!(debug.contains("source_id: \"mem:1000\""));
    }
}
