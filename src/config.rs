use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, PoolResult},
    policy::PolicyKind,
};

/// The default page size.
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

/// The default number of resident frames.
pub const DEFAULT_FRAME_CAPACITY: usize = 1024;

/// Configuration for a [`Pager`].
///
/// Both sizes must be positive. `frame_capacity` is a soft cap on resident
/// frames; it also drives the file preallocation size and the rental pool
/// headroom.
///
/// [`Pager`]: crate::io::pager::Pager
#[derive(Debug, Clone)]
pub struct PagerConfig {
    /// Size of a single page, in bytes. Fixed for the life of the file.
    pub page_size: usize,
    /// Soft cap on the number of resident frames.
    pub frame_capacity: usize,
    /// The replacement policy to construct the pool with.
    pub policy: PolicyKind,
    /// Ambient cancellation signal. The pager derives a child token from it,
    /// so cancelling the given token cancels all suspended pool operations.
    pub cancel: Option<CancellationToken>,
}

impl PagerConfig {
    /// Constructs a configuration with the given policy and default sizes.
    pub fn new(policy: PolicyKind) -> Self {
        PagerConfig {
            page_size: DEFAULT_PAGE_SIZE,
            frame_capacity: DEFAULT_FRAME_CAPACITY,
            policy,
            cancel: None,
        }
    }

    pub(crate) fn validate(&self) -> PoolResult<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidConfig("page_size must be positive"));
        }
        if self.frame_capacity == 0 {
            return Err(Error::InvalidConfig("frame_capacity must be positive"));
        }
        Ok(())
    }

    /// The rental pool is over-provisioned by 25% (rounded up) to absorb
    /// transient frame-table overshoot during concurrent misses.
    pub(crate) fn rental_pool_size(&self) -> usize {
        (self.frame_capacity * 5 + 3) / 4
    }
}
