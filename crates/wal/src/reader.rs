//! Forward scan over a WAL file (§4.2, §4.6 recovery's Analysis pass).
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use talus_common::{Lsn, PageId, Result};

use crate::record::{decode_header, header_to_record, verify_crc, LogRecord, LOG_RECORD_HEADER_SIZE};

pub struct WalReader {
    file: File,
}

/// Outcome of trying to read one record at the reader's current position.
#[derive(Debug)]
pub enum ReadResult {
    Record(LogRecord, u64),
    /// Clean end of file — no partial record follows.
    Eof,
    /// A record header or payload was present but truncated or checksum-
    /// invalid; recovery stops here rather than trusting anything past it.
    Torn { file_offset: u64 },
}

impl WalReader {
    pub fn open(path: &Path) -> Result<WalReader> {
        Ok(WalReader { file: File::open(path)? })
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn stream_position(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    /// Read one record starting at the current position. `file_offset` in
    /// `ReadResult::Record` is the offset the record started at (useful for
    /// building an LSN → offset index).
    pub fn read_record(&mut self) -> Result<ReadResult> {
        let file_offset = self.file.stream_position()?;

        let mut hdr_buf = [0u8; LOG_RECORD_HEADER_SIZE];
        match self.file.read_exact(&mut hdr_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(ReadResult::Eof),
            Err(e) => return Err(e.into()),
        }

        let hdr = match decode_header(&hdr_buf) {
            Some(hdr) => hdr,
            None => return Ok(ReadResult::Torn { file_offset }),
        };

        let mut before = vec![0u8; hdr.before_len as usize];
        let mut after = vec![0u8; hdr.after_len as usize];
        if self.file.read_exact(&mut before).is_err() || self.file.read_exact(&mut after).is_err() {
            return Ok(ReadResult::Torn { file_offset });
        }

        if !verify_crc(&hdr_buf[..LOG_RECORD_HEADER_SIZE - 4], &before, &after, hdr.crc32) {
            return Ok(ReadResult::Torn { file_offset });
        }

        Ok(ReadResult::Record(header_to_record(&hdr, before, after), file_offset))
    }

    /// Scan the whole file from the start, returning every well-formed
    /// record up to the first torn or missing one.
    pub fn scan_all(&mut self) -> Result<Vec<LogRecord>> {
        self.seek_to(0)?;
        let mut records = Vec::new();
        loop {
            match self.read_record()? {
                ReadResult::Record(record, _) => records.push(record),
                ReadResult::Eof | ReadResult::Torn { .. } => break,
            }
        }
        Ok(records)
    }

    /// Scan the whole file, returning records alongside the file offset each
    /// one started at (used to build the LSN → offset index during
    /// recovery's undo pass).
    pub fn scan_all_with_offsets(&mut self) -> Result<Vec<(LogRecord, u64)>> {
        self.seek_to(0)?;
        let mut records = Vec::new();
        loop {
            match self.read_record()? {
                ReadResult::Record(record, offset) => records.push((record, offset)),
                ReadResult::Eof | ReadResult::Torn { .. } => break,
            }
        }
        Ok(records)
    }

    /// Build a page_id → highest LSN seen index over every well-formed
    /// record, alongside an lsn → file-offset index for chain-walking.
    pub fn build_index(&mut self) -> Result<(HashMap<PageId, Lsn>, HashMap<Lsn, u64>)> {
        let mut page_latest = HashMap::new();
        let mut lsn_offset = HashMap::new();
        for (record, offset) in self.scan_all_with_offsets()? {
            lsn_offset.insert(record.lsn, offset);
            if record.page_id != 0 {
                let entry = page_latest.entry(record.page_id).or_insert(0);
                if record.lsn > *entry {
                    *entry = record.lsn;
                }
            }
        }
        Ok((page_latest, lsn_offset))
    }
}
