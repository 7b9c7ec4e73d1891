//! Raw WAL scan used as the input to recovery (§4.6).
//!
//! This module does only the mechanical part: read every well-formed record
//! from the front of the file, stopping at the first gap or corruption. It
//! does not attempt ARIES's Analysis/Redo/Undo passes — those need the
//! buffer pool and record store and live in `talus_storage::recovery`. Note
//! in particular that the file is never truncated here: idempotent redo
//! (`record.lsn > page.lsn`) plus CLRs make replaying past a completed undo
//! safe, so there is nothing to gain from discarding the tail on open.
use std::path::Path;

use talus_common::{Lsn, Result};

use crate::reader::WalReader;
use crate::record::LogRecord;

/// Every well-formed record in the file, in append order, plus the file
/// offset each one started at.
#[derive(Debug)]
pub struct WalScan {
    pub records: Vec<(LogRecord, u64)>,
}

impl WalScan {
    pub fn max_lsn(&self) -> Lsn {
        self.records.iter().map(|(r, _)| r.lsn).max().unwrap_or(0)
    }
}

pub fn scan(wal_path: &Path) -> Result<WalScan> {
    let mut reader = WalReader::open(wal_path)?;
    let records = reader.scan_all_with_offsets()?;
    Ok(WalScan { records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WalWriter;
    use tempfile::tempdir;

    #[test]
    fn scan_reports_max_lsn() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut writer = WalWriter::open(&path).unwrap();
            writer.append(&LogRecord::begin(1), 1).unwrap();
            writer.append(&LogRecord::commit(1, 1), 2).unwrap();
            writer.sync().unwrap();
        }
        let result = scan(&path).unwrap();
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.max_lsn(), 2);
    }

    #[test]
    fn scan_of_missing_file_is_empty_on_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            WalWriter::open(&path).unwrap();
        }
        let result = scan(&path).unwrap();
        assert!(result.records.is_empty());
    }
}
