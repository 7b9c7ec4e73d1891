//! The Disk Manager: maps page ids onto fixed-size slots in a single page
//! file (§4.1 "Page file").
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use talus_common::{EngineError, Page, PageId, Result, NULL_PAGE_ID, PAGE_SIZE};
use tracing::trace;

/// Operations a buffer pool needs from whatever is backing page storage.
/// Exists so the buffer pool can be exercised against an in-memory fake in
/// unit tests without touching a real file.
pub trait PageIo: Send + Sync {
    fn read_page(&self, page_id: PageId) -> Result<Page>;
    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()>;
    fn allocate_page(&self) -> Result<PageId>;
    fn sync(&self) -> Result<()>;
    fn page_count(&self) -> u64;

    /// Logically equivalent to reading each id in order; a backend that can
    /// batch I/O at the OS level (or submit requests concurrently, as
    /// `AsyncDiskManager` does) should override this. Result order always
    /// matches `ids`' order (§4.1 "backend equivalence").
    fn read_pages_batch(&self, ids: &[PageId]) -> Result<Vec<Page>> {
        ids.iter().map(|&id| self.read_page(id)).collect()
    }

    /// Symmetric to `read_pages_batch`.
    fn write_pages_batch(&self, ids: &[PageId], pages: &[Page]) -> Result<()> {
        for (&id, page) in ids.iter().zip(pages) {
            self.write_page(id, page)?;
        }
        Ok(())
    }
}

/// `PageIo` backed by a single growable file. Page `id` lives at byte offset
/// `(id - 1) * PAGE_SIZE`; id 0 is never allocated (`NULL_PAGE_ID`).
pub struct SyncDiskManager {
    file: Mutex<File>,
    next_page_id: AtomicU64,
    path: PathBuf,
}

impl SyncDiskManager {
    pub fn open(path: impl Into<PathBuf>) -> Result<SyncDiskManager> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let len = file.metadata()?.len();
        let page_count = len / PAGE_SIZE as u64;
        Ok(SyncDiskManager {
            file: Mutex::new(file),
            next_page_id: AtomicU64::new(page_count + 1),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(page_id: PageId) -> u64 {
        (page_id - 1) * PAGE_SIZE as u64
    }
}

impl PageIo for SyncDiskManager {
    fn read_page(&self, page_id: PageId) -> Result<Page> {
        if page_id == NULL_PAGE_ID {
            return Err(EngineError::InvalidArgument("cannot read the null page".into()));
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        let mut buf = [0u8; PAGE_SIZE];
        file.read_exact(&mut buf).map_err(|_| EngineError::page_not_found(page_id))?;
        trace!(page_id, "read page from disk");
        Ok(Page::from_bytes(buf))
    }

    fn write_page(&self, page_id: PageId, page: &Page) -> Result<()> {
        if page_id == NULL_PAGE_ID {
            return Err(EngineError::InvalidArgument("cannot write the null page".into()));
        }
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        file.write_all(page.as_bytes())?;
        trace!(page_id, "wrote page to disk");
        Ok(())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let zeroed = Page::new_zeroed(page_id, talus_common::PageKind::Free);
        self.write_page(page_id, &zeroed)?;
        Ok(page_id)
    }

    fn sync(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        file.sync_data().map_err(EngineError::from)
    }

    fn page_count(&self) -> u64 {
        self.next_page_id.load(Ordering::SeqCst) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_then_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let disk = SyncDiskManager::open(dir.path().join("data.pages")).unwrap();
        let page_id = disk.allocate_page().unwrap();

        let mut page = Page::new_zeroed(page_id, talus_common::PageKind::Data);
        page.payload_mut()[0] = 0x42;
        page.recompute_checksum();
        disk.write_page(page_id, &page).unwrap();

        let read_back = disk.read_page(page_id).unwrap();
        assert_eq!(read_back.payload()[0], 0x42);
        assert!(read_back.verify_checksum());
    }

    #[test]
    fn reopen_resumes_page_id_allocation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.pages");
        let first_id = {
            let disk = SyncDiskManager::open(&path).unwrap();
            disk.allocate_page().unwrap()
        };
        let disk = SyncDiskManager::open(&path).unwrap();
        let second_id = disk.allocate_page().unwrap();
        assert!(second_id > first_id);
    }

    #[test]
    fn reading_unallocated_page_fails() {
        let dir = tempdir().unwrap();
        let disk = SyncDiskManager::open(dir.path().join("data.pages")).unwrap();
        assert!(disk.read_page(999).is_err());
    }

    #[test]
    fn batch_read_and_write_preserve_input_order() {
        let dir = tempdir().unwrap();
        let disk = SyncDiskManager::open(dir.path().join("data.pages")).unwrap();

        let ids: Vec<PageId> = (0..3).map(|_| disk.allocate_page().unwrap()).collect();
        let pages: Vec<Page> = ids
            .iter()
            .map(|&id| {
                let mut page = Page::new_zeroed(id, talus_common::PageKind::Data);
                page.payload_mut()[0] = id as u8;
                page.recompute_checksum();
                page
            })
            .collect();

        // Write out of order; the batch call itself must still line up
        // `ids[i]` with `pages[i]`.
        let shuffled_ids = vec![ids[2], ids[0], ids[1]];
        let shuffled_pages = vec![pages[2].clone(), pages[0].clone(), pages[1].clone()];
        disk.write_pages_batch(&shuffled_ids, &shuffled_pages).unwrap();

        let read_back = disk.read_pages_batch(&ids).unwrap();
        for (page, &id) in read_back.iter().zip(&ids) {
            assert_eq!(page.payload()[0], id as u8);
        }
    }
}
