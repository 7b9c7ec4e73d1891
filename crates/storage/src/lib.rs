//! Durable storage layer: the record store, vector store, manifest, and
//! crash recovery built on top of `talus-wal` and `talus-compute` (§4.4–§4.6).

pub mod manifest;
pub mod record_store;
pub mod recovery;
pub mod slotted_page;
pub mod txn;
pub mod vector_store;
pub mod hnsw;
pub mod engine;

pub use engine::Engine;
pub use manifest::Manifest;
pub use record_store::{RecordStore, WriteOp};
pub use txn::{run_txn, TxnIdAllocator};
pub use vector_store::VectorStore;
