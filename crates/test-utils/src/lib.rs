pub mod builders;
pub mod fake_scheduler;
pub mod harness;

use std::sync::Once;
use std::thread;

use buildcoord::logging::LOG_ENV;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Stack size of a default tokio worker thread.
pub const WORKER_STACK: usize = 2 * 1024 * 1024;

/// Initialise tracing for tests.
///
/// Logs are captured per test and only shown for failures (or with
/// `-- --nocapture`). The filter comes from `BUILDCOORD_LOG`, the same
/// variable the binary reads, e.g.
/// `BUILDCOORD_LOG=buildcoord::engine=trace cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run `f` on a fresh thread with a tokio-worker-sized stack and return its
/// result. Panics in `f` are re-raised on the caller.
pub fn on_worker_stack<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = thread::Builder::new()
        .name("worker-stack".into())
        .stack_size(WORKER_STACK)
        .spawn(f)
        .expect("spawn test thread");
    match handle.join() {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}
