//! The key/value record store: slotted data pages plus overflow chains for
//! oversized values, with an in-memory ordered index rebuilt by page scan on
//! open (§4.4).
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use talus_common::{EngineError, Page, PageId, PageKind, Result};
use talus_compute::BufferPoolManager;
use talus_wal::LogManager;

use crate::slotted_page::{self, DecodedCell};
use crate::txn::{run_txn, TxnIdAllocator};

#[derive(Debug, Clone, Copy)]
struct Location {
    page_id: PageId,
    slot: u16,
}

/// Durable, ordered key/value store. `scan`'s ordering comes directly from
/// `BTreeMap<Vec<u8>, _>` — keys are compared byte-wise, matching §4.4's
/// "lexicographic on the raw key bytes" ordering rule.
pub struct RecordStore {
    bpm: Arc<BufferPoolManager>,
    wal: Arc<LogManager>,
    txn_ids: Arc<TxnIdAllocator>,
    index: Mutex<BTreeMap<Vec<u8>, Location>>,
    pages: Mutex<Vec<PageId>>,
    page_kind: PageKind,
}

impl RecordStore {
    /// Rebuild a record store over `pages` (in the order they were created)
    /// by scanning every slot on every page. Pass an empty slice to create
    /// a brand-new, empty store. `page_kind` is the tag newly allocated data
    /// pages carry — `Data` for the key-value store, `VectorRecord` for the
    /// vector store's parallel record space.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        wal: Arc<LogManager>,
        txn_ids: Arc<TxnIdAllocator>,
        mut pages: Vec<PageId>,
        page_kind: PageKind,
    ) -> Result<RecordStore> {
        let mut index = BTreeMap::new();
        for &page_id in &pages {
            bpm.with_page(page_id, |page| {
                scan_page(page, &mut index, page_id);
            })?;
        }

        if pages.is_empty() {
            let (page_id, ()) = bpm.new_page(page_kind, |page| {
                slotted_page::init(page.payload_mut());
                page.recompute_checksum();
                Ok(())
            })?;
            pages.push(page_id);
        }

        Ok(RecordStore {
            bpm,
            wal,
            txn_ids,
            index: Mutex::new(index),
            pages: Mutex::new(pages),
            page_kind,
        })
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.pages.lock().unwrap().clone()
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(EngineError::InvalidArgument("key must not be empty".into()));
        }
        run_txn(&self.wal, &self.txn_ids, |txn_id, begin_lsn| {
            let lsn = self.put_in_txn(txn_id, begin_lsn, key, value)?;
            Ok((lsn, ()))
        })
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let existed = self.index.lock().unwrap().contains_key(key);
        if !existed {
            return Ok(false);
        }
        run_txn(&self.wal, &self.txn_ids, |txn_id, begin_lsn| {
            let lsn = self.delete_in_txn(txn_id, begin_lsn, key)?;
            Ok((lsn, ()))
        })?;
        Ok(true)
    }

    /// Apply every op as one transaction: all-or-nothing with respect to
    /// crash recovery (§4.6 "batch atomicity").
    pub fn batch_write(&self, ops: &[WriteOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        run_txn(&self.wal, &self.txn_ids, |txn_id, begin_lsn| {
            let mut prev_lsn = begin_lsn;
            for op in ops {
                prev_lsn = match op {
                    WriteOp::Put(key, value) => self.put_in_txn(txn_id, prev_lsn, key, value)?,
                    WriteOp::Delete(key) => self.delete_in_txn(txn_id, prev_lsn, key)?,
                };
            }
            Ok((prev_lsn, ()))
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let location = *match self.index.lock().unwrap().get(key) {
            Some(loc) => loc,
            None => return Ok(None),
        };
        self.read_value_at(location)
    }

    pub fn get_all_entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan(None, None, None, false)
    }

    pub fn scan(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: Option<usize>,
        reverse: bool,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let locations: Vec<(Vec<u8>, Location)> = {
            let index = self.index.lock().unwrap();
            let iter: Box<dyn DoubleEndedIterator<Item = (&Vec<u8>, &Location)>> = match (start, end) {
                (Some(s), Some(e)) => Box::new(index.range(s.to_vec()..e.to_vec())),
                (Some(s), None) => Box::new(index.range(s.to_vec()..)),
                (None, Some(e)) => Box::new(index.range(..e.to_vec())),
                (None, None) => Box::new(index.iter()),
            };
            if reverse {
                iter.rev().map(|(k, v)| (k.clone(), *v)).collect()
            } else {
                iter.map(|(k, v)| (k.clone(), *v)).collect()
            }
        };

        let mut results = Vec::new();
        for (key, location) in locations {
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }
            if let Some(value) = self.read_value_at(location)? {
                results.push((key, value));
            }
        }
        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    fn read_value_at(&self, location: Location) -> Result<Option<Vec<u8>>> {
        let decoded = self
            .bpm
            .with_page(location.page_id, |page| decode_slot(page, location.slot))?;
        if decoded.tombstone {
            return Ok(None);
        }
        if !decoded.overflow {
            return Ok(Some(decoded.inline_value));
        }
        let mut value = Vec::with_capacity(decoded.overflow_total_len as usize);
        let mut next = decoded.overflow_first_page;
        while next != talus_common::NULL_PAGE_ID && value.len() < decoded.overflow_total_len as usize {
            let (chunk, next_page) = self.bpm.with_page(next, |page| {
                let (next_page, chunk_len) = slotted_page::read_overflow_header(page.payload());
                let start = slotted_page::OVERFLOW_HEADER_LEN;
                (page.payload()[start..start + chunk_len as usize].to_vec(), next_page)
            })?;
            value.extend_from_slice(&chunk);
            next = next_page;
        }
        Ok(Some(value))
    }

    fn put_in_txn(&self, txn_id: u64, prev_lsn: talus_common::Lsn, key: &[u8], value: &[u8]) -> Result<talus_common::Lsn> {
        let old_location = self.index.lock().unwrap().get(key).copied();

        let cell = if value.len() > slotted_page::INLINE_VALUE_LIMIT {
            let first_page = self.write_overflow_chain(value)?;
            slotted_page::encode_overflow_cell(key, value.len() as u32, first_page)
        } else {
            slotted_page::encode_inline_cell(key, value)
        };

        let (page_id, slot, lsn) = self.append_cell_with_wal(txn_id, prev_lsn, &cell)?;

        if let Some(old) = old_location {
            self.tombstone_with_wal(txn_id, lsn, old)?;
        }

        self.index.lock().unwrap().insert(key.to_vec(), Location { page_id, slot });
        Ok(lsn)
    }

    fn delete_in_txn(&self, txn_id: u64, prev_lsn: talus_common::Lsn, key: &[u8]) -> Result<talus_common::Lsn> {
        let location = match self.index.lock().unwrap().remove(key) {
            Some(loc) => loc,
            None => return Ok(prev_lsn),
        };
        self.tombstone_with_wal(txn_id, prev_lsn, location)
    }

    fn tombstone_with_wal(&self, txn_id: u64, prev_lsn: talus_common::Lsn, location: Location) -> Result<talus_common::Lsn> {
        let before = self.bpm.with_page(location.page_id, |page| page.payload().to_vec())?;
        let mut after = before.clone();
        slotted_page::tombstone_in_place(&mut after, location.slot);
        let lsn = self.wal.append_update(txn_id, prev_lsn, location.page_id, 0, before, after.clone())?;
        self.bpm.with_page_mut(location.page_id, |page| {
            page.payload_mut().copy_from_slice(&after);
            page.set_lsn(lsn);
            page.recompute_checksum();
            Ok(())
        })?;
        Ok(lsn)
    }

    /// Append `cell` to the last known page if it fits, otherwise allocate
    /// a fresh data page, recording the whole-page before/after image in
    /// the WAL so redo stays trivially idempotent.
    fn append_cell_with_wal(&self, txn_id: u64, prev_lsn: talus_common::Lsn, cell: &[u8]) -> Result<(PageId, u16, talus_common::Lsn)> {
        let mut pages = self.pages.lock().unwrap();
        let mut target = *pages.last().unwrap();

        let has_room = self.bpm.with_page(target, |page| slotted_page::free_space(page.payload()) >= cell.len())?;
        if !has_room {
            let (new_page_id, ()) = self.bpm.new_page(self.page_kind, |page| {
                slotted_page::init(page.payload_mut());
                page.recompute_checksum();
                Ok(())
            })?;
            pages.push(new_page_id);
            target = new_page_id;
        }

        let before = self.bpm.with_page(target, |page| page.payload().to_vec())?;
        let mut after = before.clone();
        let slot = slotted_page::append_cell(&mut after, cell)
            .ok_or_else(|| EngineError::Other("record does not fit on a fresh page".into()))?;

        let lsn = self.wal.append_update(txn_id, prev_lsn, target, 0, before, after.clone())?;
        self.bpm.with_page_mut(target, |page| {
            page.payload_mut().copy_from_slice(&after);
            page.set_lsn(lsn);
            page.recompute_checksum();
            Ok(())
        })?;

        Ok((target, slot, lsn))
    }

    fn write_overflow_chain(&self, value: &[u8]) -> Result<PageId> {
        let mut next_page = talus_common::NULL_PAGE_ID;
        for chunk in value.chunks(slotted_page::OVERFLOW_CHUNK_CAPACITY).rev() {
            let chunk = chunk.to_vec();
            let linked_next = next_page;
            let (page_id, ()) = self.bpm.new_page(PageKind::Overflow, move |page| {
                slotted_page::write_overflow_header(page.payload_mut(), linked_next, chunk.len() as u16);
                let start = slotted_page::OVERFLOW_HEADER_LEN;
                page.payload_mut()[start..start + chunk.len()].copy_from_slice(&chunk);
                page.recompute_checksum();
                Ok(())
            })?;
            next_page = page_id;
        }
        Ok(next_page)
    }
}

pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn decode_slot(page: &Page, slot: u16) -> DecodedCell {
    slotted_page::decode_cell(slotted_page::cell_bytes(page.payload(), slot))
}

fn scan_page(page: &Page, index: &mut BTreeMap<Vec<u8>, Location>, page_id: PageId) {
    let payload = page.payload();
    for slot in 0..slotted_page::num_slots(payload) {
        let decoded = slotted_page::decode_cell(slotted_page::cell_bytes(payload, slot));
        if decoded.tombstone {
            index.remove(&decoded.key);
        } else {
            index.insert(decoded.key, Location { page_id, slot });
        }
    }
}
