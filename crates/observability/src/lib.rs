//! Process-wide logging setup for ledger binaries and tests.

/// Initialize tracing/logging from the environment.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(tracing::LogSettings::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;
