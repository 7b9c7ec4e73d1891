//! On-disk WAL record format (§3 "Log record", §4.2).
//!
//! Layout, little-endian, fixed 47-byte header followed by
//! `before_len + after_len` bytes of payload:
//!
//! ```text
//! lsn            : u64 (8)
//! prev_lsn_in_txn: u64 (8)
//! txn_id         : u64 (8)
//! record_type    : u8  (1)
//! page_id        : u64 (8)
//! offset         : u16 (2)
//! before_len     : u32 (4)
//! after_len      : u32 (4)
//! crc32          : u32 (4)   — CRC of every field above (crc excluded) plus both images
//! ────────────────────────
//! total header   : 47 bytes
//! ```
use talus_common::{Lsn, PageId};

pub const LOG_RECORD_HEADER_SIZE: usize = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin = 0,
    Update = 1,
    Commit = 2,
    Abort = 3,
    Checkpoint = 4,
    Clr = 5,
}

impl LogRecordType {
    fn from_u8(b: u8) -> Option<LogRecordType> {
        match b {
            0 => Some(LogRecordType::Begin),
            1 => Some(LogRecordType::Update),
            2 => Some(LogRecordType::Commit),
            3 => Some(LogRecordType::Abort),
            4 => Some(LogRecordType::Checkpoint),
            5 => Some(LogRecordType::Clr),
            _ => None,
        }
    }
}

/// A single WAL entry (§3 "Log record").
///
/// `page_id`/`offset`/`before_image`/`after_image` are only meaningful for
/// `Update` and `Clr` records; other record types leave them at their
/// default (zero / empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn_in_txn: Lsn,
    pub txn_id: u64,
    pub record_type: LogRecordType,
    pub page_id: PageId,
    pub offset: u16,
    pub before_image: Vec<u8>,
    pub after_image: Vec<u8>,
}

impl LogRecord {
    pub fn begin(txn_id: u64) -> LogRecord {
        LogRecord::bare(txn_id, 0, LogRecordType::Begin)
    }

    pub fn commit(txn_id: u64, prev_lsn: Lsn) -> LogRecord {
        LogRecord::bare(txn_id, prev_lsn, LogRecordType::Commit)
    }

    pub fn abort(txn_id: u64, prev_lsn: Lsn) -> LogRecord {
        LogRecord::bare(txn_id, prev_lsn, LogRecordType::Abort)
    }

    pub fn checkpoint(state: &[u8]) -> LogRecord {
        LogRecord {
            lsn: 0,
            prev_lsn_in_txn: 0,
            txn_id: 0,
            record_type: LogRecordType::Checkpoint,
            page_id: 0,
            offset: 0,
            before_image: Vec::new(),
            after_image: state.to_vec(),
        }
    }

    pub fn update(
        txn_id: u64,
        prev_lsn: Lsn,
        page_id: PageId,
        offset: u16,
        before: Vec<u8>,
        after: Vec<u8>,
    ) -> LogRecord {
        LogRecord {
            lsn: 0,
            prev_lsn_in_txn: prev_lsn,
            txn_id,
            record_type: LogRecordType::Update,
            page_id,
            offset,
            before_image: before,
            after_image: after,
        }
    }

    pub fn clr(txn_id: u64, prev_lsn: Lsn, page_id: PageId, offset: u16, after: Vec<u8>) -> LogRecord {
        LogRecord {
            lsn: 0,
            prev_lsn_in_txn: prev_lsn,
            txn_id,
            record_type: LogRecordType::Clr,
            page_id,
            offset,
            before_image: Vec::new(),
            after_image: after,
        }
    }

    fn bare(txn_id: u64, prev_lsn: Lsn, record_type: LogRecordType) -> LogRecord {
        LogRecord {
            lsn: 0,
            prev_lsn_in_txn: prev_lsn,
            txn_id,
            record_type,
            page_id: 0,
            offset: 0,
            before_image: Vec::new(),
            after_image: Vec::new(),
        }
    }

    pub fn is_mtr_end(&self) -> bool {
        matches!(self.record_type, LogRecordType::Commit | LogRecordType::Abort)
    }
}

pub fn encode(record: &LogRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOG_RECORD_HEADER_SIZE + record.before_image.len() + record.after_image.len());
    buf.extend_from_slice(&record.lsn.to_le_bytes());
    buf.extend_from_slice(&record.prev_lsn_in_txn.to_le_bytes());
    buf.extend_from_slice(&record.txn_id.to_le_bytes());
    buf.push(record.record_type as u8);
    buf.extend_from_slice(&record.page_id.to_le_bytes());
    buf.extend_from_slice(&record.offset.to_le_bytes());
    buf.extend_from_slice(&(record.before_image.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(record.after_image.len() as u32).to_le_bytes());

    let crc = compute_crc(&buf, &record.before_image, &record.after_image);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&record.before_image);
    buf.extend_from_slice(&record.after_image);
    buf
}

/// Header fields as parsed off disk, prior to reading the variable-length
/// payload that follows.
#[derive(Debug, Clone, Copy)]
pub struct DecodedHeader {
    pub lsn: Lsn,
    pub prev_lsn_in_txn: Lsn,
    pub txn_id: u64,
    pub record_type: LogRecordType,
    pub page_id: PageId,
    pub offset: u16,
    pub before_len: u32,
    pub after_len: u32,
    pub crc32: u32,
}

pub fn decode_header(buf: &[u8; LOG_RECORD_HEADER_SIZE]) -> Option<DecodedHeader> {
    let record_type = LogRecordType::from_u8(buf[24])?;
    Some(DecodedHeader {
        lsn: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
        prev_lsn_in_txn: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        txn_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        record_type,
        page_id: u64::from_le_bytes(buf[25..33].try_into().unwrap()),
        offset: u16::from_le_bytes(buf[33..35].try_into().unwrap()),
        before_len: u32::from_le_bytes(buf[35..39].try_into().unwrap()),
        after_len: u32::from_le_bytes(buf[39..43].try_into().unwrap()),
        crc32: u32::from_le_bytes(buf[43..47].try_into().unwrap()),
    })
}

pub fn header_to_record(hdr: &DecodedHeader, before_image: Vec<u8>, after_image: Vec<u8>) -> LogRecord {
    LogRecord {
        lsn: hdr.lsn,
        prev_lsn_in_txn: hdr.prev_lsn_in_txn,
        txn_id: hdr.txn_id,
        record_type: hdr.record_type,
        page_id: hdr.page_id,
        offset: hdr.offset,
        before_image,
        after_image,
    }
}

/// CRC over the header bytes written so far (everything but the CRC field
/// itself) plus both images.
fn compute_crc(header_without_crc: &[u8], before: &[u8], after: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_without_crc);
    hasher.update(before);
    hasher.update(after);
    hasher.finalize()
}

pub fn verify_crc(header_without_crc: &[u8], before: &[u8], after: &[u8], expected: u32) -> bool {
    compute_crc(header_without_crc, before, after) == expected
}
