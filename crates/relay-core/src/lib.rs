//! Store-file replacement and clock helpers shared by the relay crates.

pub mod clock;
pub mod store_files;

pub use clock::{deadline_passed, unix_now, unix_now_ms};
pub use store_files::{discard_store_file, replace_store_file};
