use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use async_channel::{Receiver, Sender};
use bytes::BytesMut;

/// A fixed set of page-sized buffers shared by all frames.
///
/// Buffers are rented on the load path and travel back through the channel
/// when the renting [`PageBuf`] is dropped, so frame destruction and error
/// paths both return their buffer without further bookkeeping. All memory is
/// allocated up front; renting never allocates.
#[derive(Clone)]
pub(crate) struct BufferPool {
    slots: (Sender<BytesMut>, Receiver<BytesMut>),
}

impl BufferPool {
    /// Allocates `slots` buffers of `page_size` bytes each.
    pub fn new(page_size: usize, slots: usize) -> Self {
        let (tx, rx) = async_channel::bounded(slots);
        for _ in 0..slots {
            tx.try_send(BytesMut::zeroed(page_size))
                .expect("pool channel is sized for all slots");
        }
        BufferPool { slots: (tx, rx) }
    }

    /// Rents a buffer, suspending while all of them are out.
    pub async fn rent(&self) -> PageBuf {
        let bytes = self
            .slots
            .1
            .recv()
            .await
            .expect("pool channel endpoints are owned by the pool");
        PageBuf {
            bytes,
            home: self.slots.0.clone(),
        }
    }

    /// The number of buffers currently available for rent.
    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.slots.1.len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.slots.1.len())
            .finish()
    }
}

/// A page-sized buffer rented from the shared [`BufferPool`].
///
/// Dropping the buffer returns it to the pool. A returned buffer must not be
/// retained elsewhere; the `BytesMut` inside is never split or resized.
pub struct PageBuf {
    bytes: BytesMut,
    home: Sender<BytesMut>,
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        let bytes = std::mem::take(&mut self.bytes);
        // The channel cannot be full (it is bounded by the total number of
        // buffers) nor closed (the pool owns both endpoints).
        let _ = self.home.try_send(bytes);
    }
}

impl fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuf")
            .field("len", &self.bytes.len())
            .finish()
    }
}
