//! Write-ahead log subsystem (§4.2): on-disk record format, the append-only
//! writer/reader pair, the raw recovery scan, and the `LogManager` façade
//! that assigns LSNs and coordinates group commit.

pub mod manager;
pub mod reader;
pub mod record;
pub mod recovery;
pub mod writer;

pub use manager::LogManager;
pub use reader::{ReadResult, WalReader};
pub use record::{LogRecord, LogRecordType, LOG_RECORD_HEADER_SIZE};
pub use recovery::{scan, WalScan};
pub use writer::WalWriter;
