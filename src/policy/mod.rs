//! Replacement policies for the buffer pool.
//!
//! A policy owns an ordered collection of page ids and decides eviction
//! order. The pager drives it through three operations: [`bump`] on every
//! hit or install, [`evict`] when the frame table overflows, and [`remove`]
//! when a specific id must be stripped.
//!
//! Policies never block on I/O; the pager serialises access to them through
//! a single lock, which is never held across a file operation.
//!
//! [`bump`]: ReplacementPolicy::bump
//! [`evict`]: ReplacementPolicy::evict
//! [`remove`]: ReplacementPolicy::remove

use crate::page::PageId;

mod clock;
mod lru;

pub use clock::ClockPolicy;
pub use lru::LruPolicy;

/// An eviction-ordering policy over page ids.
pub trait ReplacementPolicy: Send {
    /// Promotes `page_id` to the most-recently-used position, inserting it
    /// if absent.
    ///
    /// Bumping is idempotent: repeated calls with the same id never produce
    /// duplicate entries.
    fn bump(&mut self, page_id: PageId);

    /// Chooses and removes a victim, or returns `None` when the policy is
    /// empty.
    fn evict(&mut self) -> Option<PageId>;

    /// Removes a specific id, returning whether it was present.
    fn remove(&mut self, page_id: PageId) -> bool;

    /// Returns the number of ids currently tracked.
    fn len(&self) -> usize;

    /// Returns whether the policy tracks no ids.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The set of built-in replacement policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Least-recently-used ordering.
    Lru,
    /// CLOCK (second chance) sweep.
    Clock,
}

impl PolicyKind {
    pub(crate) fn build(self) -> Box<dyn ReplacementPolicy> {
        match self {
            PolicyKind::Lru => Box::new(LruPolicy::new()),
            PolicyKind::Clock => Box::new(ClockPolicy::new()),
        }
    }
}
