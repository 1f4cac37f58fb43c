use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use pagepool::{CancellationToken, Error, LatchKind, Pager, PagerConfig, PolicyKind};

use crate::test_utils::{page, seed_file, setup_tracing, test_path, TestPool};

mod test_utils;

#[tokio::test]
async fn accessors_reflect_the_configuration() {
    let pool = TestPool::new(32, 5, PolicyKind::Clock, 2).await.unwrap();

    assert_eq!(pool.page_size(), 32);
    assert_eq!(pool.frame_capacity(), 5);
    assert_eq!(pool.resident_count(), 0);
}

#[tokio::test]
async fn leases_of_the_same_page_share_one_buffer() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let first = pool.lease_read(page(1)).await.unwrap();
    let data = first.as_ptr();
    first.release();

    let second = pool.lease_read(page(1)).await.unwrap();
    assert_eq!(second.as_ptr(), data);
    second.release();
}

#[tokio::test]
async fn read_leases_are_shared() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let first = pool.lease_read(page(1)).await.unwrap();
    let second = pool.lease_read(page(1)).await.unwrap();

    // A writer cannot slip in while readers hold the latch.
    assert!(pool.try_lease_write(page(1)).await.unwrap().is_none());

    first.release();
    second.release();

    let writer = pool.try_lease_write(page(1)).await.unwrap().unwrap();
    writer.release();
}

#[tokio::test(flavor = "multi_thread")]
async fn write_latch_excludes_other_writers() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let held = pool.lease_write(page(1)).await.unwrap();

    let entered = Arc::new(AtomicBool::new(false));
    let waiter = {
        let pager = pool.pager().clone();
        let entered = Arc::clone(&entered);
        tokio::spawn(async move {
            let lease = pager.lease_write(page(1)).await.unwrap();
            entered.store(true, Ordering::Release);
            lease.release();
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!entered.load(Ordering::Acquire));

    held.release();
    waiter.await.unwrap();
    assert!(entered.load(Ordering::Acquire));
}

#[tokio::test]
async fn lease_with_no_latch_kind_is_rejected() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let result = pool.lease(page(1), LatchKind::None).await;
    assert!(matches!(result, Err(Error::BadLatchRequest)));
    assert_eq!(pool.resident_count(), 0);
}

#[tokio::test]
async fn lease_by_kind_resolves_both_directions() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let lease = pool.lease(page(2), LatchKind::Read).await.unwrap();
    assert!(lease.iter().all(|&byte| byte == 2));
    lease.release();

    let lease = pool.lease(page(2), LatchKind::Write).await.unwrap();
    assert_eq!(lease.page_id(), page(2));
    lease.release();
}

#[tokio::test]
async fn read_through_does_not_install_a_frame() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let buf = pool.read_through(page(2)).await.unwrap();
    assert!(buf.iter().all(|&byte| byte == 2));

    assert!(!pool.is_resident(page(2)));
    assert_eq!(pool.resident_count(), 0);
}

#[tokio::test]
async fn missing_pages_fail_deterministically() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    // Past both the seeded pages and the preallocated region.
    let result = pool.lease_read(page(40)).await;
    assert!(matches!(result, Err(Error::PageOutOfBounds(id)) if id == page(40)));
    assert_eq!(pool.resident_count(), 0);
}

#[tokio::test]
async fn disposed_pools_reject_every_operation() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let lease = pool.lease_write(page(1)).await.unwrap();
    pool.dispose();
    // Dispose is idempotent.
    pool.dispose();

    assert!(matches!(lease.mark_dirty().await, Err(Error::Disposed)));
    assert!(matches!(lease.flush().await, Err(Error::Disposed)));
    lease.release();

    assert!(matches!(
        pool.lease(page(1), LatchKind::Read).await,
        Err(Error::Disposed)
    ));
    assert!(matches!(pool.lease_read(page(1)).await, Err(Error::Disposed)));
    assert!(matches!(pool.lease_write(page(1)).await, Err(Error::Disposed)));
    assert!(matches!(pool.read_through(page(1)).await, Err(Error::Disposed)));
    assert!(matches!(pool.flush_page(page(1)).await, Err(Error::Disposed)));
    assert!(matches!(pool.flush_all().await, Err(Error::Disposed)));
}

#[tokio::test]
async fn cancelled_miss_leaves_the_table_unchanged() {
    setup_tracing();

    let path = test_path();
    seed_file(&path, 16, 2);

    let token = CancellationToken::new();
    let mut config = PagerConfig::new(PolicyKind::Lru);
    config.page_size = 16;
    config.frame_capacity = 2;
    config.cancel = Some(token.clone());

    let pager = Pager::open(&path, config).await.unwrap();
    token.cancel();

    let result = pager.lease_read(page(1)).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(pager.resident_count(), 0);

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_wakes_suspended_latch_waiters() {
    let pool = TestPool::new(16, 3, PolicyKind::Lru, 2).await.unwrap();

    let held = pool.lease_write(page(1)).await.unwrap();

    let waiter = {
        let pager = pool.pager().clone();
        tokio::spawn(async move { pager.lease_write(page(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    pool.cancellation_token().cancel();
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));

    // The held lease and the frame survive the cancelled waiter.
    assert!(pool.is_resident(page(1)));
    held.release();
}
