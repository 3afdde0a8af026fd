//! Process-wide startup and shutdown of the runtime that delivers read
//! completions.
//!
//! Streams can only be created between [`startup`] and [`shutdown`]. The
//! runtime's worker threads are the "arbitrary threads" completions land on,
//! so the driving thread must never be one of them.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use lazy_static::lazy_static;
use tokio::runtime::{self, Handle, Runtime};

use crate::{ProbeError, Result};

const WORKER_THREADS: usize = 4;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

lazy_static! {
    static ref RUNTIME: RwLock<Option<Runtime>> = RwLock::new(None);
}

/// Start the completion runtime. Calling it again while started is a no-op.
pub fn startup() -> Result<()> {
    let mut slot = RUNTIME.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        log::debug!("platform: already started");
        return Ok(());
    }

    let runtime = runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name("bytestream-worker")
        .enable_all()
        .build()?;
    *slot = Some(runtime);
    log::info!("platform: started with {} workers", WORKER_THREADS);
    Ok(())
}

/// Stop the completion runtime. Outstanding work gets a grace period and is
/// then dropped; streams created before the call keep answering queries but
/// can no longer schedule reads.
pub fn shutdown() {
    let runtime = RUNTIME
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match runtime {
        Some(runtime) => {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
            log::info!("platform: shut down");
        }
        None => log::debug!("platform: shutdown without startup"),
    }
}

pub fn is_started() -> bool {
    RUNTIME
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Handle to the completion runtime, for spawning work from any thread.
pub fn handle() -> Result<Handle> {
    RUNTIME
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .map(|runtime| runtime.handle().clone())
        .ok_or(ProbeError::NotStarted)
}

/// Run a future to completion on the platform runtime from a thread that is
/// not one of its workers.
pub fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    Ok(handle()?.block_on(future))
}

/// Keeps the platform started for as long as it lives.
///
/// The guard does not count references: dropping any guard shuts the
/// platform down, matching the single start/stop bracket of a probe run.
#[must_use = "dropping the guard shuts the platform down"]
pub struct PlatformGuard(());

impl PlatformGuard {
    pub fn start() -> Result<Self> {
        startup()?;
        Ok(Self(()))
    }
}

impl Drop for PlatformGuard {
    fn drop(&mut self) {
        shutdown();
    }
}
