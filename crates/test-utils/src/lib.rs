pub mod builders;
pub mod fake_probe;
pub mod fake_supervisor;

pub use builders::{manifest_fs, manifest_fs_with, JobContextBuilder, WORKDIR};
pub use fake_probe::FakeProbe;
pub use fake_supervisor::{FakeSupervisor, Script, SignalRecord};
pub use sauceci::context::RecordingSink;

use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 60-second timeout. Under a paused clock this is
/// virtual time, so it only trips on a real hang.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(60), f)
        .await
        .expect("Test timed out after 60 seconds")
}
