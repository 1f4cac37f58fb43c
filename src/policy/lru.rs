use hashlink::LinkedHashMap;

use super::ReplacementPolicy;
use crate::page::PageId;

/// Least-recently-used replacement policy.
///
/// Backed by a [`LinkedHashMap`], which combines the doubly-linked recency
/// list and the hash index into it, so every operation is O(1). The front of
/// the list is the least-recently bumped id.
#[derive(Debug, Default)]
pub struct LruPolicy {
    entries: LinkedHashMap<PageId, ()>,
}

impl LruPolicy {
    pub fn new() -> Self {
        LruPolicy {
            entries: LinkedHashMap::new(),
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn bump(&mut self, page_id: PageId) {
        // Detach-and-append keeps a single occurrence per id.
        self.entries.remove(&page_id);
        self.entries.insert(page_id, ());
    }

    fn evict(&mut self) -> Option<PageId> {
        self.entries.pop_front().map(|(page_id, ())| page_id)
    }

    fn remove(&mut self, page_id: PageId) -> bool {
        self.entries.remove(&page_id).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
