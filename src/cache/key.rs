//! Cache key derivation
//!
//! A command's program and arguments are joined with a single space and
//! hashed with SHA-256. Same argv = same key, across processes and hosts.
//!
//! The join is not injective: `["echo", "a b"]` and `["echo", "a", "b"]`
//! produce the same key. Such commands share one cache record.

use sha2::{Digest, Sha256};
use std::fmt;

/// Separator placed between argv elements before hashing
const ARG_SEPARATOR: &str = " ";

/// Content-addressed identifier for one command's cache record and lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a command (program followed by its arguments)
    pub fn derive(command: &[String]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(join_command(command).as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hex digest used as the file stem of every artifact for this key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command line as stored in the `.cmd` file and fed to the hasher
pub fn join_command(command: &[String]) -> String {
    command.join(ARG_SEPARATOR)
}
