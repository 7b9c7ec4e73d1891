//! The Buffer Pool Manager (§4.3): pinning, LRU-K(2) eviction, and the one
//! place in the engine where the WAL-before-page rule is enforced.

pub mod buffer_pool;
pub mod frame;
pub mod replacer;

pub use buffer_pool::BufferPoolManager;
pub use frame::Frame;
pub use replacer::{FrameId, LruKReplacer};
