//! A disk-backed page buffer pool: a fixed-capacity, concurrency-safe cache
//! of fixed-size pages over a single backing file, with pluggable
//! replacement policies and per-page reader/writer latching.

pub mod config;
pub mod error;
pub mod page;
pub mod policy;

pub mod io;

pub use config::{PagerConfig, DEFAULT_FRAME_CAPACITY, DEFAULT_PAGE_SIZE};
pub use error::{Error, PoolResult};
pub use io::buffer_pool::PageBuf;
pub use io::pager::{LatchKind, Lease, Pager, ReadLease, WriteLease};
pub use page::PageId;
pub use policy::PolicyKind;

pub use tokio_util::sync::CancellationToken;
