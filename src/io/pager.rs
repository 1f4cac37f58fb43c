use std::{
    future::Future,
    ops::{Deref, DerefMut},
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use drop_bomb::DropBomb;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Mutex, MutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    config::PagerConfig,
    error::{Error, PoolResult},
    io::{
        buffer_pool::{BufferPool, PageBuf},
        disk_manager::DiskManager,
        frame::Frame,
    },
    page::PageId,
    policy::ReplacementPolicy,
};

/// The kind of latch to take on a leased page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchKind {
    /// No latch. Only valid for operations that bypass the frame table.
    None,
    /// Shared latch: multiple concurrent readers.
    Read,
    /// Exclusive latch: a single writer, no readers.
    Write,
}

/// The pager, also known as the buffer manager, resolves page ids into
/// latched in-memory buffers, deciding when pages are loaded from and
/// flushed to the backing file.
///
/// Pages are cached in a bounded frame table; installations beyond
/// `frame_capacity` trigger a policy-driven eviction attempt. Capacity is
/// enforced eventually: a burst of concurrent misses may transiently
/// overshoot the cap, bounded by the rental pool headroom.
///
/// The pager is cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Pager {
    shared: Arc<Shared>,
}

struct Shared {
    page_size: usize,
    frame_capacity: usize,

    /// The store latch: the underlying file cursor is shared state, so all
    /// page I/O is sequenced through this lock.
    disk: Mutex<DiskManager>,

    /// The frame table. Entries are only mutated through `entry` and
    /// `remove_if`, so install and evict are shard-atomic.
    frames: DashMap<PageId, Arc<Frame>>,

    /// The replacement policy, serialised by its own lock. Never held
    /// across an I/O call.
    policy: Mutex<Box<dyn ReplacementPolicy>>,

    /// The rental pool frames draw their buffers from.
    buffers: BufferPool,

    /// Dirty queue producer and (snapshot-drained) consumer ends.
    dirty_tx: UnboundedSender<Arc<Frame>>,
    dirty_rx: Mutex<UnboundedReceiver<Arc<Frame>>>,

    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl Pager {
    /// Opens the backing file at `path` and constructs a pager over it.
    ///
    /// The file is created and preallocated on first access; an existing
    /// file is reused as-is (pages previously written are readable again).
    pub async fn open(path: impl AsRef<Path>, config: PagerConfig) -> PoolResult<Pager> {
        config.validate()?;

        let disk =
            DiskManager::open(path.as_ref(), config.page_size, config.frame_capacity).await?;
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();
        let cancel = config
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        let shared = Arc::new(Shared {
            page_size: config.page_size,
            frame_capacity: config.frame_capacity,
            disk: Mutex::new(disk),
            frames: DashMap::with_capacity(config.frame_capacity),
            policy: Mutex::new(config.policy.build()),
            buffers: BufferPool::new(config.page_size, config.rental_pool_size()),
            dirty_tx,
            dirty_rx: Mutex::new(dirty_rx),
            cancel,
            disposed: AtomicBool::new(false),
        });

        info!(
            page_size = config.page_size,
            frame_capacity = config.frame_capacity,
            "opened page pool"
        );
        Ok(Pager { shared })
    }

    /// Leases the page under the requested latch kind.
    ///
    /// `LatchKind::None` is rejected with [`Error::BadLatchRequest`]; use
    /// [`Pager::read_through`] for unlatched access.
    pub async fn lease(&self, page_id: PageId, kind: LatchKind) -> PoolResult<Lease> {
        match kind {
            LatchKind::Read => Ok(Lease::Read(self.lease_read(page_id).await?)),
            LatchKind::Write => Ok(Lease::Write(self.lease_write(page_id).await?)),
            LatchKind::None => Err(Error::BadLatchRequest),
        }
    }

    /// Leases the page under the shared latch, loading it on a miss.
    ///
    /// Suspends while a writer holds the latch.
    pub async fn lease_read(&self, page_id: PageId) -> PoolResult<ReadLease> {
        let frame = self.shared.lease_frame(page_id).await?;
        let guard = self.shared.cancellable(frame.latch().read_owned()).await?;
        Ok(ReadLease {
            frame,
            guard,
            bomb: DropBomb::new("forgot to call `release` on page read lease"),
        })
    }

    /// Leases the page under the exclusive latch, loading it on a miss.
    ///
    /// Suspends until all readers drain.
    pub async fn lease_write(&self, page_id: PageId) -> PoolResult<WriteLease> {
        let frame = self.shared.lease_frame(page_id).await?;
        let guard = self.shared.cancellable(frame.latch().write_owned()).await?;
        Ok(WriteLease {
            shared: Arc::clone(&self.shared),
            frame,
            guard,
            bomb: DropBomb::new("forgot to call `release` on page write lease"),
        })
    }

    /// Attempts a read lease without suspending on the latch.
    ///
    /// A miss still loads and installs the page, so the call may suspend on
    /// I/O; only the latch acquisition itself is non-blocking.
    pub async fn try_lease_read(&self, page_id: PageId) -> PoolResult<Option<ReadLease>> {
        let frame = self.shared.lease_frame(page_id).await?;
        match frame.latch().try_read_owned() {
            Ok(guard) => Ok(Some(ReadLease {
                frame,
                guard,
                bomb: DropBomb::new("forgot to call `release` on page read lease"),
            })),
            Err(_) => Ok(None),
        }
    }

    /// Attempts a write lease without suspending on the latch. See
    /// [`Pager::try_lease_read`].
    pub async fn try_lease_write(&self, page_id: PageId) -> PoolResult<Option<WriteLease>> {
        let frame = self.shared.lease_frame(page_id).await?;
        match frame.latch().try_write_owned() {
            Ok(guard) => Ok(Some(WriteLease {
                shared: Arc::clone(&self.shared),
                frame,
                guard,
                bomb: DropBomb::new("forgot to call `release` on page write lease"),
            })),
            Err(_) => Ok(None),
        }
    }

    /// Reads the page directly into a freshly rented buffer, bypassing the
    /// frame table and the policy.
    ///
    /// The caller owns the returned buffer; dropping it returns it to the
    /// rental pool.
    pub async fn read_through(&self, page_id: PageId) -> PoolResult<PageBuf> {
        self.shared.ensure_open()?;
        let mut buf = self.shared.rent_buffer().await?;
        self.shared.read_into(page_id, &mut buf).await?;
        Ok(buf)
    }

    /// Writes the given page back to the store if it is resident and dirty,
    /// returning whether a write-back happened.
    ///
    /// # Deadlock
    ///
    /// This method acquires the frame's write latch. Callers already
    /// holding a write lease on the page must use [`WriteLease::flush`]
    /// instead.
    pub async fn flush_page(&self, page_id: PageId) -> PoolResult<bool> {
        self.shared.ensure_open()?;
        let Some(frame) = self
            .shared
            .frames
            .get(&page_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(false);
        };
        self.shared.flush_frame(&frame).await
    }

    /// Flushes every frame enqueued as dirty.
    ///
    /// The dirty queue is snapshotted first and the snapshot is flushed in
    /// insertion order. Per-frame failures do not short-circuit: the frame
    /// is re-enqueued (still dirty) and all failures surface as a single
    /// [`Error::FlushAll`] after every attempt.
    #[instrument(skip_all)]
    pub async fn flush_all(&self) -> PoolResult<()> {
        self.shared.ensure_open()?;

        let snapshot = {
            let mut dirty_rx = self
                .shared
                .cancellable(self.shared.dirty_rx.lock())
                .await?;
            let mut snapshot = Vec::new();
            while let Ok(frame) = dirty_rx.try_recv() {
                snapshot.push(frame);
            }
            snapshot
        };

        let mut flushed = 0usize;
        let mut failures = Vec::new();
        for frame in snapshot {
            match self.shared.flush_frame(&frame).await {
                Ok(true) => flushed += 1,
                // A clean frame here is a queue duplicate whose first
                // occurrence already flushed it.
                Ok(false) => {}
                Err(error) => {
                    self.shared.enqueue_dirty(&frame);
                    failures.push((frame.page_id(), error));
                }
            }
        }
        info!(flushed, "flushed dirty pages");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::FlushAll(failures))
        }
    }

    /// Tears the pool down.
    ///
    /// Every subsequent operation fails with [`Error::Disposed`];
    /// operations currently suspended are woken with [`Error::Cancelled`].
    /// Idempotent. Dirty frames that were not flushed are lost.
    pub fn dispose(&self) {
        if !self.shared.disposed.swap(true, Ordering::AcqRel) {
            self.shared.cancel.cancel();
            info!("page pool disposed");
        }
    }

    /// Returns the pool's page size.
    pub fn page_size(&self) -> usize {
        self.shared.page_size
    }

    /// Returns the soft cap on resident frames.
    pub fn frame_capacity(&self) -> usize {
        self.shared.frame_capacity
    }

    /// Returns the number of currently resident pages.
    pub fn resident_count(&self) -> usize {
        self.shared.frames.len()
    }

    /// Returns whether the given page is currently resident.
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.shared.frames.contains_key(&page_id)
    }

    /// Returns the pool's cancellation token. Cancelling it fails all
    /// suspended and future suspending operations with
    /// [`Error::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

impl Shared {
    fn ensure_open(&self) -> PoolResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Races a suspension point against the ambient cancellation signal.
    async fn cancellable<F: Future>(&self, fut: F) -> PoolResult<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            output = fut => Ok(output),
        }
    }

    async fn lock_policy(&self) -> PoolResult<MutexGuard<'_, Box<dyn ReplacementPolicy>>> {
        self.cancellable(self.policy.lock()).await
    }

    async fn lock_disk(&self) -> PoolResult<MutexGuard<'_, DiskManager>> {
        self.cancellable(self.disk.lock()).await
    }

    async fn bump(&self, page_id: PageId) -> PoolResult<()> {
        self.lock_policy().await?.bump(page_id);
        Ok(())
    }

    async fn rent_buffer(&self) -> PoolResult<PageBuf> {
        self.cancellable(self.buffers.rent()).await
    }

    async fn read_into(&self, page_id: PageId, buf: &mut PageBuf) -> PoolResult<()> {
        let mut disk = self.lock_disk().await?;
        self.cancellable(disk.read_page(page_id, buf)).await?
    }

    fn enqueue_dirty(&self, frame: &Arc<Frame>) {
        self.dirty_tx
            .send(Arc::clone(frame))
            .expect("dirty queue receiver is owned by the pool");
    }

    /// Resolves the page to a pinned frame, loading and installing it on a
    /// miss.
    async fn lease_frame(&self, page_id: PageId) -> PoolResult<Arc<Frame>> {
        self.ensure_open()?;

        // Hit path: contended hits only serialise through the policy bump.
        if let Some(frame) = self
            .frames
            .get(&page_id)
            .map(|entry| Arc::clone(entry.value()))
        {
            self.bump(page_id).await?;
            return Ok(frame);
        }

        // Miss path: rent and read before touching the table, so the load
        // does not block concurrent hits.
        let mut buf = self.rent_buffer().await?;
        self.read_into(page_id, &mut buf).await?;

        if self.frames.len() >= self.frame_capacity {
            self.evict_once().await;
        }

        // Install, adopting the winner's frame when another load raced us.
        // The loser's rented buffer goes back to the pool on drop.
        let frame = match self.frames.entry(page_id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let frame = Arc::new(Frame::new(page_id, buf));
                entry.insert(Arc::clone(&frame));
                frame
            }
        };
        self.bump(page_id).await?;
        Ok(frame)
    }

    /// Runs one eviction attempt against the policy.
    ///
    /// A victim that is pinned, latched or dirty is re-inserted and the
    /// attempt moves on to the next candidate, bounded by the policy
    /// population at entry. Failures never propagate: the caller's install
    /// simply proceeds above the soft cap.
    async fn evict_once(&self) {
        let attempts = match self.lock_policy().await {
            // Nothing to evict: the table filled up from loads the policy
            // has not been told about yet.
            Ok(policy) if policy.is_empty() => return,
            Ok(policy) => policy.len(),
            Err(_) => return,
        };
        for _ in 0..attempts {
            let victim = match self.lock_policy().await {
                Ok(mut policy) => policy.evict(),
                Err(_) => return,
            };
            let Some(victim) = victim else { return };

            // A frame is evictable only while nothing pins or latches it
            // (strong count of one) and it is clean. The check runs under
            // the table's shard lock, so a concurrent hit cannot slip in.
            let removed = self.frames.remove_if(&victim, |_, frame| {
                Arc::strong_count(frame) == 1 && !frame.is_dirty()
            });
            match removed {
                Some(_) => {
                    debug!(?victim, "evicted page");
                    return;
                }
                None if self.frames.contains_key(&victim) => {
                    // Ineligible: give it another chance.
                    match self.lock_policy().await {
                        Ok(mut policy) => policy.bump(victim),
                        Err(_) => return,
                    }
                }
                // Stale id: an earlier eviction or racing install already
                // stripped the frame; the policy no longer tracks it.
                None => return,
            }
        }
    }

    /// Flushes the frame if dirty, acquiring its write latch first (latch
    /// before store latch, per the lock hierarchy).
    async fn flush_frame(&self, frame: &Arc<Frame>) -> PoolResult<bool> {
        if !frame.is_dirty() {
            return Ok(false);
        }
        let guard = self.cancellable(frame.latch().write_owned()).await?;
        // Another flush may have raced us while we waited for the latch.
        if !frame.is_dirty() {
            return Ok(false);
        }
        self.write_back(frame, &guard).await?;
        Ok(true)
    }

    /// Writes the buffer back under the store latch and clears the dirty
    /// flag. On failure the flag is left set, so the flush can be retried.
    async fn write_back(&self, frame: &Frame, buf: &PageBuf) -> PoolResult<()> {
        {
            let mut disk = self.lock_disk().await?;
            self.cancellable(disk.write_page(frame.page_id(), buf)).await??;
        }
        frame.clear_dirty();
        Ok(())
    }
}

/// A latched page lease of either direction, as produced by
/// [`Pager::lease`].
pub enum Lease {
    Read(ReadLease),
    Write(WriteLease),
}

impl Lease {
    /// Returns the leased page's id.
    pub fn page_id(&self) -> PageId {
        match self {
            Lease::Read(lease) => lease.page_id(),
            Lease::Write(lease) => lease.page_id(),
        }
    }

    /// Releases the latch and unpins the frame.
    pub fn release(self) {
        match self {
            Lease::Read(lease) => lease.release(),
            Lease::Write(lease) => lease.release(),
        }
    }
}

impl Deref for Lease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Lease::Read(lease) => lease,
            Lease::Write(lease) => lease,
        }
    }
}

/// A shared lease over a resident page. Non-exclusive for other read
/// leases.
///
/// Leases must be released explicitly with [`ReadLease::release`].
pub struct ReadLease {
    frame: Arc<Frame>,
    guard: OwnedRwLockReadGuard<PageBuf>,
    bomb: DropBomb,
}

impl ReadLease {
    /// Returns the leased page's id.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Releases the latch and unpins the frame.
    pub fn release(mut self) {
        self.bomb.defuse();
    }
}

impl Deref for ReadLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

/// An exclusive lease over a resident page. No other lease (read or write)
/// may exist concurrently.
///
/// Mutation goes through `DerefMut`; modified buffers must be flagged with
/// [`WriteLease::mark_dirty`] to reach the backing file on a later flush.
/// Leases must be released explicitly with [`WriteLease::release`].
pub struct WriteLease {
    shared: Arc<Shared>,
    frame: Arc<Frame>,
    guard: OwnedRwLockWriteGuard<PageBuf>,
    bomb: DropBomb,
}

impl WriteLease {
    /// Returns the leased page's id.
    pub fn page_id(&self) -> PageId {
        self.frame.page_id()
    }

    /// Flags the buffer as modified and enqueues the frame for write-back.
    ///
    /// Dirty frames are never evicted; they stay resident until flushed.
    pub async fn mark_dirty(&self) -> PoolResult<()> {
        self.shared.ensure_open()?;
        self.frame.set_dirty();
        self.shared.enqueue_dirty(&self.frame);
        self.shared.bump(self.frame.page_id()).await
    }

    /// Writes the page back under the held latch, returning whether a
    /// write-back happened (`false` when the frame is clean).
    pub async fn flush(&self) -> PoolResult<bool> {
        self.shared.ensure_open()?;
        if !self.frame.is_dirty() {
            return Ok(false);
        }
        self.shared.write_back(&self.frame, &self.guard).await?;
        Ok(true)
    }

    /// Releases the latch and unpins the frame.
    pub fn release(mut self) {
        self.bomb.defuse();
    }
}

impl Deref for WriteLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl DerefMut for WriteLease {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}
