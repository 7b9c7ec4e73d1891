//! Append-only WAL file writer (§4.2).
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use talus_common::{EngineError, Lsn, Result};

use crate::record::{encode, LogRecord};

/// Sequential writer over the single WAL file. Callers serialize access
/// through `LogManager`; this type itself does no locking.
pub struct WalWriter {
    file: BufWriter<File>,
    next_offset: u64,
}

impl WalWriter {
    pub fn open(path: &Path) -> Result<WalWriter> {
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
        let next_offset = file.seek(SeekFrom::End(0))?;
        Ok(WalWriter {
            file: BufWriter::new(file),
            next_offset,
        })
    }

    /// Append one record, stamping it with `lsn`. Returns the file offset it
    /// was written at.
    pub fn append(&mut self, record: &LogRecord, lsn: Lsn) -> Result<u64> {
        let mut stamped = record.clone();
        stamped.lsn = lsn;
        let bytes = encode(&stamped);
        let offset = self.next_offset;
        self.file.write_all(&bytes)?;
        self.next_offset += bytes.len() as u64;
        Ok(offset)
    }

    /// Flush userspace buffers and fsync, making every record appended so
    /// far durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data().map_err(EngineError::from)
    }

    pub fn stream_position(&self) -> u64 {
        self.next_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::WalReader;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut writer = WalWriter::open(&path).unwrap();
            writer.append(&LogRecord::begin(1), 1).unwrap();
            writer
                .append(&LogRecord::update(1, 1, 9, 0, vec![], vec![1, 2, 3]), 2)
                .unwrap();
            writer.append(&LogRecord::commit(1, 2), 3).unwrap();
            writer.sync().unwrap();
        }

        let mut reader = WalReader::open(&path).unwrap();
        let records = reader.scan_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].after_image, vec![1, 2, 3]);
    }
}
