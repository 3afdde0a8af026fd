//! Backing stores for a [`ByteStream`](crate::ByteStream).
//!
//! A source only knows how to report its size and fetch a byte range. The
//! cursor, clamping and lifecycle rules all live in the stream.

use std::future::Future;
use std::pin::Pin;

use bitflags::bitflags;

use crate::Result;

mod file;
mod http;
mod memory;

pub use file::FileSource;
pub use http::{HttpAuthConfig, HttpConfig, HttpSource};
pub use memory::MemorySource;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const SEEKABLE = 1 << 2;
        const REMOTE = 1 << 3;
        const SLOW_SEEK = 1 << 8;
    }
}

pub type ReadFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;

/// Random-access store a stream reads from.
pub trait ByteSource: Send + Sync {
    /// Total size in bytes. Fixed for the lifetime of the source.
    fn total_size(&self) -> u64;

    fn capabilities(&self) -> Capabilities;

    /// Fetch `length` bytes starting at `offset`.
    ///
    /// The stream never asks for bytes past [`ByteSource::total_size`], but a
    /// source may still return fewer bytes than requested.
    fn read_range(&self, offset: u64, length: u64) -> ReadFuture<'_>;

    /// Identifier for logs, usually the URI the source was opened from.
    fn source_id(&self) -> &str;
}
