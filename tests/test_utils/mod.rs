use std::{
    ops::Deref,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use pagepool::{PageId, Pager, PagerConfig, PolicyKind, PoolResult};

/// Installs the tracing subscriber, once per test binary.
///
/// Pool operations log at `info`/`debug`; run with `RUST_LOG=pagepool=debug`
/// to watch lease and eviction traffic during a failing test.
pub fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[allow(dead_code)]
pub fn page(n: u64) -> PageId {
    PageId::new_u64(n)
}

/// Generates a path to a test pool file.
pub fn test_path() -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(1);

    let id = COUNTER.fetch_add(1, Ordering::AcqRel);
    std::fs::create_dir_all("ignore").unwrap();
    PathBuf::from(format!("ignore/{id}-test.db"))
}

/// Seeds the file with `pages` pages of `page_size` bytes, where page `n`
/// is filled with the byte value `n`.
pub fn seed_file(path: &Path, page_size: usize, pages: usize) {
    let mut data = Vec::with_capacity(page_size * pages);
    for n in 1..=pages {
        data.extend(std::iter::repeat(n as u8).take(page_size));
    }
    std::fs::write(path, data).unwrap();
}

/// A pager over a seeded temporary file, removed on drop.
pub struct TestPool {
    pager: Pager,
    path: PathBuf,
    config: PagerConfig,
}

impl TestPool {
    /// Creates a pool over a fresh seeded file (see [`seed_file`]).
    pub async fn new(
        page_size: usize,
        frame_capacity: usize,
        policy: PolicyKind,
        seed_pages: usize,
    ) -> PoolResult<Self> {
        setup_tracing();

        let path = test_path();
        seed_file(&path, page_size, seed_pages);

        let mut config = PagerConfig::new(policy);
        config.page_size = page_size;
        config.frame_capacity = frame_capacity;

        let pager = Pager::open(&path, config.clone()).await?;
        Ok(TestPool {
            pager,
            path,
            config,
        })
    }

    #[allow(dead_code)]
    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Opens a second pager over the same file, with the same
    /// configuration.
    #[allow(dead_code)]
    pub async fn reopen(&self) -> PoolResult<Pager> {
        Pager::open(&self.path, self.config.clone()).await
    }
}

impl Deref for TestPool {
    type Target = Pager;

    fn deref(&self) -> &Self::Target {
        &self.pager
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).unwrap();
    }
}
