//! Shared test utilities for the starmap crates.
//!
//! - [`TestDir`] - Managed temporary directory with bundle path helpers
//! - [`CrashInjector`] / [`CrashingBackend`] - Simulated crashes during sealing
//! - [`CountingBackend`] - Per-page read counting with optional read delay
//! - [`strategies`] - Proptest strategies and seeded catalogs

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod test_dir;
pub use test_dir::TestDir;

mod crash_injector;
pub use crash_injector::{CrashInjector, CrashPoint, CrashingBackend};

mod counting_backend;
pub use counting_backend::CountingBackend;

pub mod strategies;
