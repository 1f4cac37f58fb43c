use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::RwLock;

use crate::{io::buffer_pool::PageBuf, page::PageId};

/// The unit of residence: one frame per in-memory page.
///
/// The frame owns its rented buffer through the latch, a reader-writer lock
/// admitting multiple readers xor a single writer. The frame table stores
/// `Arc<Frame>` and every lease (and the internal flush path) clones that
/// `Arc`, so a strong count of one means the frame is neither pinned nor
/// latched. Dropping the last `Arc` drops the buffer, which returns itself
/// to the rental pool.
#[derive(Debug)]
pub(crate) struct Frame {
    page_id: PageId,
    dirty: AtomicBool,
    latch: Arc<RwLock<PageBuf>>,
}

impl Frame {
    pub fn new(page_id: PageId, buf: PageBuf) -> Self {
        Frame {
            page_id,
            dirty: AtomicBool::new(false),
            latch: Arc::new(RwLock::new(buf)),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns a handle to the latch, suitable for owned guard acquisition.
    pub fn latch(&self) -> Arc<RwLock<PageBuf>> {
        Arc::clone(&self.latch)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the buffer as modified. Callers must hold the write latch.
    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag after a successful write-back. Callers must
    /// hold the write latch.
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }
}
