use std::io;

use crate::page::PageId;

pub type PoolResult<T, E = Error> = Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The given page ID was out of bounds of the backing file.
    #[error("page out of bounds ({0:?})")]
    PageOutOfBounds(PageId),

    /// Read an incomplete raw page, i.e., read less than `page_size` bytes.
    #[error("incomplete read for page ({0:?})")]
    ShortRead(PageId),

    /// Wrote an incomplete raw page.
    #[error("incomplete write for page ({0:?})")]
    ShortWrite(PageId),

    /// A seek resolved to an offset other than the requested one.
    #[error("seek for page ({page_id:?}) resolved to {actual}, expected {expected}")]
    SeekMismatch {
        page_id: PageId,
        expected: u64,
        actual: u64,
    },

    /// A directional latch was required, but [`LatchKind::None`] was given.
    ///
    /// [`LatchKind::None`]: crate::io::pager::LatchKind::None
    #[error("a directional latch is required for this operation")]
    BadLatchRequest,

    /// The pool was already torn down when the operation was invoked.
    #[error("buffer pool has been disposed")]
    Disposed,

    /// The ambient cancellation signal fired while the operation was
    /// suspended.
    #[error("operation cancelled")]
    Cancelled,

    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Aggregate of per-page failures from `flush_all`.
    #[error("failed to flush {} page(s)", .0.len())]
    FlushAll(Vec<(PageId, Error)>),

    /// A generic IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
