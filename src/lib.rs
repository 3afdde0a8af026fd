//! Probe for the observable contract of an asynchronous, seekable byte
//! stream backed by a remote resource.
//!
//! A [`ByteStream`] is read with `begin_read` / `end_read` pairs whose
//! completions arrive on the [`platform`] runtime's worker threads. The
//! [`scenario`] module drives streams through boundary cases (reads across
//! the end, overlapping reads, seeks racing reads, negative seeks, closing
//! mid-read) and records what happened at every step.

pub mod config;
mod errors;
pub mod operation;
pub mod platform;
pub mod report;
pub mod resolver;
pub mod scenario;
pub mod signal;
pub mod source;
pub mod stream;

pub use config::ProbeConfig;
pub use errors::{ProbeError, Result, Status};
pub use operation::{ReadCompletion, ReadHandle, ReadState};
pub use resolver::{DefaultResolver, StreamResolver};
pub use scenario::{Scenario, ScenarioReport, StepRecord};
pub use signal::CompletionSignal;
pub use source::{ByteSource, Capabilities};
pub use stream::{ByteStream, Lifecycle};
