//! The page file layer: a single append/overwrite-in-place file addressed
//! by fixed-size page id, with no knowledge of the WAL or what its payloads
//! mean (§4.1).

pub mod pagefile;

#[cfg(feature = "async-disk")]
pub mod async_disk;

pub use pagefile::{PageIo, SyncDiskManager};

#[cfg(feature = "async-disk")]
pub use async_disk::AsyncDiskManager;
