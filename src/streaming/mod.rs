//! Per-connection content pipeline.
//!
//! `ContentFeeder` expands the pattern, opens each match through
//! `ContentSource` and passes the streams over a rendezvous `handoff`
//! channel to a single `ContentWriter`, which copies them to the client in
//! order.

mod enumerate;
mod feeder;
pub mod handoff;
mod source;
mod writer;

pub use enumerate::FileEnumerator;
pub use feeder::{ContentFeeder, FeedSummary};
pub use source::{ContentSource, ContentStream};
pub use writer::{ContentWriter, WriterSummary};

/// Buffer size for each read/write step of a file transfer.
pub(crate) const COPY_BUF_SIZE: usize = 16 * 1024;
