//! Transaction id allocation and the begin/commit/abort envelope every
//! mutating Engine operation runs inside (§4.2, §4.6).
use std::sync::atomic::{AtomicU64, Ordering};

use talus_common::{Lsn, Result};
use talus_wal::LogManager;

/// Hands out globally unique transaction ids. Shared by the record store
/// and vector store so recovery's analysis pass sees one consistent
/// transaction table regardless of which subsystem a txn touched.
#[derive(Default)]
pub struct TxnIdAllocator(AtomicU64);

impl TxnIdAllocator {
    pub fn new(start_after: u64) -> TxnIdAllocator {
        TxnIdAllocator(AtomicU64::new(start_after))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Runs `body` inside a Begin/Commit pair, writing an Abort record instead
/// if `body` fails. `body` receives the txn id and the Begin record's LSN
/// (its initial `prev_lsn_in_txn`) and returns the LSN of its own last
/// record plus its result.
pub fn run_txn<T>(
    wal: &LogManager,
    txn_ids: &TxnIdAllocator,
    body: impl FnOnce(u64, Lsn) -> Result<(Lsn, T)>,
) -> Result<T> {
    let txn_id = txn_ids.next();
    let begin_lsn = wal.append_begin(txn_id)?;
    match body(txn_id, begin_lsn) {
        Ok((last_lsn, value)) => {
            let commit_lsn = wal.append_commit(txn_id, last_lsn)?;
            wal.flush_through(commit_lsn)?;
            Ok(value)
        }
        Err(err) => {
            let _ = wal.append_abort(txn_id, begin_lsn);
            Err(err)
        }
    }
}
