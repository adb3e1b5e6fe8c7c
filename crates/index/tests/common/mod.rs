//! Shared helpers for the index integration tests.

/// Routes `tracing` output through the test harness.
///
/// Honors `RUST_LOG`, so `RUST_LOG=starmap_index=debug cargo test` shows the
/// warnings logged when pages fail verification or builds abort. Safe to call
/// from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
