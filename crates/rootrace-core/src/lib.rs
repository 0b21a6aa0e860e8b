//! Low-level file and clock helpers shared by the RooTrace crates.
//!
//! The store file is only ever replaced wholesale, so everything here is
//! built around "write a sibling temp file, then rename it into place".

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::{write_text_atomic, write_text_atomic_async};
pub use time_utils::current_unix_timestamp_ms;
