//! Command output cache
//!
//! Cache records and execution locks share a key derived from the command
//! line and live side by side in one directory:
//!
//! | Artifact | Meaning |
//! |----------|---------|
//! | `<key>.data` | Output payload; its mtime is the freshness timestamp |
//! | `<key>.exit` | Exit status |
//! | `<key>.cmd` | Command line (diagnostics) |
//! | `<key>.pid` | Lock record; present while a process holds the lock |
//!
//! Records are only ever judged by age. Nothing evicts them; an expired
//! record stays on disk until the same command runs again.

pub mod key;
pub mod lock;
pub mod store;

pub use key::CacheKey;
pub use lock::{pid_alive, ExecutionLock, POLL_INTERVAL};
pub use store::{CacheStore, RecordInfo, RecordPaths, Resolution, Source};
