use std::fmt;

use crate::page::PageId;

/// The error vocabulary shared across every layer of the engine (§7).
///
/// Each variant carries just enough context for a caller (or an external
/// adapter such as an HTTP server) to decide how to react — retry, surface a
/// 4xx, surface a 5xx, or treat the condition as a bug.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("buffer pool exhausted (all {pool_size} frames pinned)")]
    BufferPoolExhausted { pool_size: usize },

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn page_not_found(page_id: PageId) -> Self {
        EngineError::NotFound(format!("page {page_id} not found"))
    }

    pub fn key_not_found(key: &[u8]) -> Self {
        EngineError::NotFound(format!("key {:?} not found", DisplayKey(key)))
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        EngineError::InvalidArgument(format!(
            "vector dimension mismatch: expected {expected}, got {actual}"
        ))
    }
}

/// Renders a byte-string key as `utf8` when printable, hex otherwise —
/// error messages should never panic on non-utf8 keys.
struct DisplayKey<'a>(&'a [u8]);

impl fmt::Debug for DisplayKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "0x{}", hex_encode(self.0)),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
