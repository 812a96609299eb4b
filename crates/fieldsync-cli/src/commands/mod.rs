pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod records;
pub mod sync;
