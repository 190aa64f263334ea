//! Single-threaded runtime helpers.
//!
//! Mirrors spawn local tasks, so every test body runs inside a `LocalSet`
//! on a current-thread runtime.

use std::future::Future;
use std::time::Duration;

/// Runs `fut` to completion inside a fresh `LocalSet`.
pub fn run_local<F: Future>(fut: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build test runtime");
    tokio::task::LocalSet::new().block_on(&rt, fut)
}

/// Lets every ready local task run, including deferred notification
/// flushes and change stream deliveries.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Sleeps for `duration`, then settles.
pub async fn settle_for(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}
