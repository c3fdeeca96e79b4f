pub mod compaction;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod export;
pub mod session;

pub use cellpilot_common as common;
