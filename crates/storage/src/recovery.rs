//! ARIES-lite crash recovery (§4.6): Analysis, Redo, Undo against a raw WAL
//! scan, applied directly through the disk manager since the buffer pool
//! isn't constructed yet at boot time.
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use talus_common::{Lsn, Result, WalSyncMode};
use talus_pagestore::PageIo;
use talus_wal::{LogManager, LogRecord, LogRecordType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub records_scanned: usize,
    pub pages_redone: usize,
    pub records_undone: usize,
    pub loser_txns: usize,
}

/// Run recovery against `wal_path` and return a fresh `LogManager` ready
/// for ongoing use, positioned after every LSN recovery itself produced
/// (the CLRs written during Undo).
pub fn recover(disk: &dyn PageIo, wal_path: &Path, sync_mode: WalSyncMode) -> Result<(Arc<LogManager>, RecoveryReport)> {
    let scan_result = talus_wal::scan(wal_path)?;
    let by_lsn: HashMap<Lsn, &LogRecord> = scan_result.records.iter().map(|(r, _)| (r.lsn, r)).collect();

    let (committed, last_record_lsn) = analyze(&scan_result.records);
    let losers: Vec<u64> = last_record_lsn
        .keys()
        .copied()
        .filter(|txn_id| !committed.contains(txn_id))
        .collect();

    let pages_redone = redo(disk, &scan_result.records)?;

    let wal = LogManager::open(wal_path, sync_mode, scan_result.max_lsn())?;
    let mut records_undone = 0;
    for &txn_id in &losers {
        records_undone += undo_transaction(disk, &wal, &by_lsn, last_record_lsn[&txn_id])?;
    }
    wal.sync_now()?;

    Ok((
        wal,
        RecoveryReport {
            records_scanned: scan_result.records.len(),
            pages_redone,
            records_undone,
            loser_txns: losers.len(),
        },
    ))
}

/// Build the winner set (transactions with a COMMIT record) and each
/// transaction's last-seen LSN, in one forward pass.
fn analyze(records: &[(LogRecord, u64)]) -> (HashSet<u64>, HashMap<u64, Lsn>) {
    let mut committed = HashSet::new();
    let mut last_record_lsn = HashMap::new();
    for (record, _offset) in records {
        last_record_lsn.insert(record.txn_id, record.lsn);
        if record.record_type == LogRecordType::Commit {
            committed.insert(record.txn_id);
        }
    }
    (committed, last_record_lsn)
}

/// Reapply every UPDATE/CLR whose LSN is newer than the page's current
/// on-disk LSN, in WAL order. Guarded by `record.lsn > page.lsn`, so this
/// is safe to run more than once.
fn redo(disk: &dyn PageIo, records: &[(LogRecord, u64)]) -> Result<usize> {
    let mut redone = 0;
    for (record, _offset) in records {
        if !matches!(record.record_type, LogRecordType::Update | LogRecordType::Clr) {
            continue;
        }
        let mut page = disk.read_page(record.page_id)?;
        if record.lsn > page.lsn() {
            page.payload_mut().copy_from_slice(&record.after_image);
            page.set_lsn(record.lsn);
            page.recompute_checksum();
            disk.write_page(record.page_id, &page)?;
            redone += 1;
        }
    }
    Ok(redone)
}

/// Walk one loser transaction's `prev_lsn_in_txn` chain backward from
/// `start_lsn`, undoing each UPDATE and emitting a CLR so a crash during
/// recovery itself stays idempotent.
fn undo_transaction(
    disk: &dyn PageIo,
    wal: &LogManager,
    by_lsn: &HashMap<Lsn, &LogRecord>,
    start_lsn: Lsn,
) -> Result<usize> {
    let mut undone = 0;
    let mut cursor = start_lsn;
    while cursor != 0 {
        let record = match by_lsn.get(&cursor) {
            Some(record) => *record,
            None => break,
        };
        match record.record_type {
            LogRecordType::Update => {
                let clr_lsn = wal.append_clr(record.txn_id, record.prev_lsn_in_txn, record.page_id, record.offset, record.before_image.clone())?;
                let mut page = disk.read_page(record.page_id)?;
                page.payload_mut().copy_from_slice(&record.before_image);
                page.set_lsn(clr_lsn);
                page.recompute_checksum();
                disk.write_page(record.page_id, &page)?;
                undone += 1;
                cursor = record.prev_lsn_in_txn;
            }
            LogRecordType::Begin => break,
            _ => cursor = record.prev_lsn_in_txn,
        }
    }
    Ok(undone)
}
