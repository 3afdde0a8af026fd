//! A single asynchronous read and its lifecycle:
//! `Created → Pending → Completed → Finalized`.
//!
//! [`ReadOperation::create`] splits an operation into two halves. The
//! [`ReadHandle`] stays with the caller and is consumed when the read is
//! finalized; the [`Completer`] travels to the worker that performs the
//! transfer and writes the outcome exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;

use crate::signal::CompletionSignal;
use crate::{ProbeError, Result, Status};

pub type OperationId = u64;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Owner of the set of reads that have been begun and not yet released.
///
/// A [`ReadHandle`] tracked by a pending set releases itself when it is
/// dropped, finalized or not.
pub(crate) trait PendingSet: Send + Sync {
    fn release(&self, id: OperationId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadState {
    Created,
    Pending,
    Completed,
    Finalized,
}

struct Slot {
    state: ReadState,
    status: Option<Status>,
    data: Vec<u8>,
}

struct Shared {
    slot: Mutex<Slot>,
    signal: CompletionSignal,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct ReadOperation;

impl ReadOperation {
    /// Create a read of `requested` bytes into `buffer`, starting at
    /// `offset` of the stream identified by `stream_id`.
    pub fn create(
        stream_id: u64,
        offset: u64,
        requested: usize,
        buffer: Vec<u8>,
    ) -> (ReadHandle, Completer) {
        let id = NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                state: ReadState::Created,
                status: None,
                data: Vec::new(),
            }),
            signal: CompletionSignal::new(),
        });
        let handle = ReadHandle {
            id,
            stream_id,
            offset,
            requested,
            buffer,
            shared: shared.clone(),
            pending: None,
            finalized: false,
        };
        let completer = Completer {
            id,
            shared,
            done: false,
        };
        (handle, completer)
    }
}

/// Worker half of a read. Writes the outcome once and fires the signal.
///
/// A completer dropped without completing (its task was cancelled or the
/// runtime went away) completes the read with [`Status::Closed`], so a
/// waiter can never hang on it.
pub struct Completer {
    id: OperationId,
    shared: Arc<Shared>,
    done: bool,
}

impl Completer {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn complete(mut self, status: Status, data: Vec<u8>) {
        self.write(status, data);
    }

    fn write(&mut self, status: Status, data: Vec<u8>) {
        if self.done {
            return;
        }
        self.done = true;
        {
            let mut slot = self.shared.slot();
            if slot.status.is_some() {
                log::warn!("read/{}: outcome already written", self.id);
                return;
            }
            log::trace!(
                "read/{}: completed status={} bytes={}",
                self.id,
                status,
                data.len()
            );
            slot.status = Some(status);
            slot.data = data;
            slot.state = ReadState::Completed;
        }
        self.shared.signal.signal();
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if !self.done {
            log::debug!("read/{}: abandoned, completing as closed", self.id);
            self.write(Status::Closed, Vec::new());
        }
    }
}

/// Caller half of a read, returned by `ByteStream::begin_read`.
pub struct ReadHandle {
    id: OperationId,
    stream_id: u64,
    offset: u64,
    requested: usize,
    buffer: Vec<u8>,
    shared: Arc<Shared>,
    pending: Option<Weak<dyn PendingSet>>,
    finalized: bool,
}

impl ReadHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Stream offset captured when the read was begun.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn state(&self) -> ReadState {
        self.shared.slot().state
    }

    pub fn is_completed(&self) -> bool {
        self.shared.signal.is_signaled()
    }

    /// Block until the worker has completed the read.
    pub fn wait(&self) -> Result<()> {
        self.shared.signal.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.shared.signal.wait_timeout(timeout)
    }

    /// Release this read from `pending` when the handle goes away.
    pub(crate) fn track_in(&mut self, pending: Weak<dyn PendingSet>) {
        self.pending = Some(pending);
    }

    pub(crate) fn mark_pending(&self) {
        let mut slot = self.shared.slot();
        if slot.state == ReadState::Created {
            slot.state = ReadState::Pending;
        }
    }

    /// Wait for the outcome, copy the transferred bytes into the caller's
    /// buffer and hand everything back.
    pub(crate) fn finalize(mut self) -> Result<ReadCompletion> {
        self.wait()?;
        let (status, data) = {
            let mut slot = self.shared.slot();
            let status = slot.status.take().ok_or_else(|| {
                ProbeError::WaitFailed(format!(
                    "read {} signalled without an outcome",
                    self.id
                ))
            })?;
            slot.state = ReadState::Finalized;
            (status, std::mem::take(&mut slot.data))
        };
        self.finalized = true;

        let bytes_read =
            data.len().min(self.requested).min(self.buffer.len());
        self.buffer[..bytes_read].copy_from_slice(&data[..bytes_read]);
        Ok(ReadCompletion {
            status,
            bytes_read,
            buffer: std::mem::take(&mut self.buffer),
        })
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("offset", &self.offset)
            .field("requested", &self.requested)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ReadHandle {
    fn drop(&mut self) {
        if !self.finalized {
            log::warn!("read/{}: dropped before end_read", self.id);
        }
        if let Some(pending) = self.pending.take().and_then(|p| p.upgrade()) {
            pending.release(self.id);
        }
    }
}

/// Outcome of a finalized read.
#[derive(Debug)]
pub struct ReadCompletion {
    pub status: Status,
    pub bytes_read: usize,
    pub buffer: Vec<u8>,
}

impl ReadCompletion {
    /// The bytes transferred by the read.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.bytes_read]
    }
}
