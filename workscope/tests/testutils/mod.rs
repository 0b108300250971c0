//! Test utilities for workscope integration tests
//!
//! - `recording`: units, buses and events that record what happened to them
//!   into a shared journal so tests can assert on ordering

#![allow(dead_code)]

pub mod recording;

/// Route `log` output through the test harness; safe to call from every test
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
