//! Foundational low-level utilities shared across vext crates.
//!
//! Provides atomic file-write helpers and time utilities used by signature
//! files, trust stores, sandbox budgets, and debug trace timestamps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_parts, format_duration_hms, is_expired_unix,
};
