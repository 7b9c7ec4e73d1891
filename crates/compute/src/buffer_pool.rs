//! The Buffer Pool Manager: a fixed set of frames backing page reads and
//! writes, pinned while in use and evicted via LRU-K(2) when full (§4.3).
//!
//! Holding the WAL's handle here — rather than in the record store — is
//! what lets this type enforce the WAL-before-page rule at the one place a
//! dirty page can ever leave memory: eviction and explicit flush. A frame
//! is never written back until `LogManager::flush_through` confirms its
//! `page.lsn()` is durable.
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use talus_common::{EngineError, EngineStats, Page, PageId, PageKind, Result};
use talus_pagestore::PageIo;
use talus_wal::LogManager;

use crate::frame::Frame;
use crate::replacer::{FrameId, LruKReplacer};

const PIN_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

struct State {
    frames: Vec<Frame>,
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    replacer: LruKReplacer,
}

pub struct BufferPoolManager {
    disk: Arc<dyn PageIo>,
    wal: Arc<LogManager>,
    pool_size: usize,
    state: Mutex<State>,
    frame_freed: Condvar,
    stats: Arc<EngineStats>,
}

impl BufferPoolManager {
    pub fn new(disk: Arc<dyn PageIo>, wal: Arc<LogManager>, pool_size: usize) -> BufferPoolManager {
        Self::with_stats(disk, wal, pool_size, Arc::new(EngineStats::new()))
    }

    /// Like `new`, but recording disk reads/writes/checksum failures into a
    /// stats object the caller already owns (the Engine shares one across
    /// its whole lifetime, for `get_stats()`).
    pub fn with_stats(disk: Arc<dyn PageIo>, wal: Arc<LogManager>, pool_size: usize, stats: Arc<EngineStats>) -> BufferPoolManager {
        let frames = (0..pool_size).map(|_| Frame::empty()).collect();
        let free_list = (0..pool_size).rev().collect();
        BufferPoolManager {
            disk,
            wal,
            pool_size,
            state: Mutex::new(State {
                frames,
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(),
            }),
            frame_freed: Condvar::new(),
            stats,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page on disk, pin it into a frame as `kind`, run `f`
    /// against it, mark it dirty, then unpin. Returns the new page id and
    /// `f`'s result.
    pub fn new_page<T>(&self, kind: PageKind, f: impl FnOnce(&mut Page) -> Result<T>) -> Result<(PageId, T)> {
        let page_id = self.disk.allocate_page()?;
        let state = self.state.lock().unwrap();
        let (mut state, frame_id) = self.pin_frame(state, page_id, Some(Page::new_zeroed(page_id, kind)))?;
        let result = f(&mut state.frames[frame_id].page);
        state.frames[frame_id].dirty = result.is_ok();
        self.unpin_locked(&mut state, frame_id);
        result.map(|value| (page_id, value))
    }

    /// Pin `page_id`, hand it to `f` read-only, then unpin.
    pub fn with_page<T>(&self, page_id: PageId, f: impl FnOnce(&Page) -> T) -> Result<T> {
        let state = self.state.lock().unwrap();
        let (mut state, frame_id) = self.pin_frame(state, page_id, None)?;
        let result = f(&state.frames[frame_id].page);
        self.unpin_locked(&mut state, frame_id);
        Ok(result)
    }

    /// Pin `page_id`, hand it to `f` mutably, mark dirty on success, unpin.
    pub fn with_page_mut<T>(&self, page_id: PageId, f: impl FnOnce(&mut Page) -> Result<T>) -> Result<T> {
        let state = self.state.lock().unwrap();
        let (mut state, frame_id) = self.pin_frame(state, page_id, None)?;
        let result = f(&mut state.frames[frame_id].page);
        if result.is_ok() {
            state.frames[frame_id].dirty = true;
        }
        self.unpin_locked(&mut state, frame_id);
        result
    }

    /// Force a page's current in-memory image to disk, regardless of its
    /// dirty flag. Waits for the WAL record covering it to be durable first.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };
        self.write_back(&state.frames[frame_id])?;
        state.frames[frame_id].dirty = false;
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<()> {
        let state = self.state.lock().unwrap();
        for frame in state.frames.iter().filter(|frame| frame.page_id != talus_common::NULL_PAGE_ID) {
            self.write_back(frame)?;
        }
        Ok(())
    }

    fn write_back(&self, frame: &Frame) -> Result<()> {
        if frame.page_id == talus_common::NULL_PAGE_ID {
            return Ok(());
        }
        self.wal.flush_through(frame.page.lsn())?;
        self.stats.record_disk_write();
        self.disk.write_page(frame.page_id, &frame.page)
    }

    /// Pin `page_id` into a frame, reading it from disk (or installing
    /// `fresh`, for a brand-new page) if it isn't already resident. Blocks
    /// on `frame_freed` when every frame is pinned, up to `PIN_WAIT_TIMEOUT`.
    fn pin_frame<'a>(
        &'a self,
        mut state: std::sync::MutexGuard<'a, State>,
        page_id: PageId,
        fresh: Option<Page>,
    ) -> Result<(std::sync::MutexGuard<'a, State>, FrameId)> {
        loop {
            if let Some(&frame_id) = state.page_table.get(&page_id) {
                state.frames[frame_id].pin_count += 1;
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, false);
                return Ok((state, frame_id));
            }

            if let Some(frame_id) = self.claim_frame(&mut state)? {
                let page = match fresh {
                    Some(page) => page,
                    None => {
                        self.stats.record_disk_read();
                        let page = self.disk.read_page(page_id)?;
                        if !page.verify_checksum() {
                            self.stats.record_checksum_failure();
                            return Err(EngineError::Corruption(format!("page {page_id} failed checksum verification")));
                        }
                        page
                    }
                };
                state.frames[frame_id] = Frame {
                    page_id,
                    page,
                    pin_count: 1,
                    dirty: false,
                };
                state.page_table.insert(page_id, frame_id);
                state.replacer.record_access(frame_id);
                state.replacer.set_evictable(frame_id, false);
                return Ok((state, frame_id));
            }

            let (next_state, timeout) = self.frame_freed.wait_timeout(state, PIN_WAIT_TIMEOUT).unwrap();
            state = next_state;
            if timeout.timed_out() {
                return Err(EngineError::BufferPoolExhausted { pool_size: self.pool_size });
            }
        }
    }

    /// Take a frame off the free list or, failing that, evict one — writing
    /// it back first if it is dirty. Returns `None` only transiently, when
    /// every frame is currently pinned (the caller retries after waiting).
    fn claim_frame(&self, state: &mut State) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(Some(frame_id));
        }
        if let Some(frame_id) = state.replacer.evict() {
            if state.frames[frame_id].dirty {
                self.write_back(&state.frames[frame_id])?;
            }
            state.page_table.remove(&state.frames[frame_id].page_id);
            return Ok(Some(frame_id));
        }
        Ok(None)
    }

    fn unpin_locked(&self, state: &mut State, frame_id: FrameId) {
        let frame = &mut state.frames[frame_id];
        frame.pin_count -= 1;
        if frame.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
            self.frame_freed.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talus_common::WalSyncMode;
    use talus_pagestore::SyncDiskManager;
    use tempfile::tempdir;

    fn make_bpm(pool_size: usize) -> (tempfile::TempDir, BufferPoolManager) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(SyncDiskManager::open(dir.path().join("data.pages")).unwrap());
        let wal = LogManager::open(&dir.path().join("wal.log"), WalSyncMode::EveryWrite, 0).unwrap();
        (dir, BufferPoolManager::new(disk, wal, pool_size))
    }

    #[test]
    fn new_page_then_read_back_sees_write() {
        let (_dir, bpm) = make_bpm(4);
        let (page_id, ()) = bpm
            .new_page(PageKind::Data, |page| {
                page.payload_mut()[0] = 0x7;
                page.recompute_checksum();
                Ok(())
            })
            .unwrap();

        let value = bpm.with_page(page_id, |page| page.payload()[0]).unwrap();
        assert_eq!(value, 0x7);
    }

    #[test]
    fn eviction_writes_back_dirty_pages() {
        let (_dir, bpm) = make_bpm(1);
        let (first_id, ()) = bpm
            .new_page(PageKind::Data, |page| {
                page.payload_mut()[0] = 1;
                page.recompute_checksum();
                Ok(())
            })
            .unwrap();

        let (second_id, ()) = bpm
            .new_page(PageKind::Data, |page| {
                page.payload_mut()[0] = 2;
                page.recompute_checksum();
                Ok(())
            })
            .unwrap();
        assert_ne!(first_id, second_id);

        let value = bpm.with_page(first_id, |page| page.payload()[0]).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn with_page_mut_marks_frame_dirty_and_is_durable_after_flush() {
        let (_dir, bpm) = make_bpm(2);
        let (page_id, ()) = bpm.new_page(PageKind::Data, |_| Ok(())).unwrap();
        bpm.with_page_mut(page_id, |page| {
            page.payload_mut()[1] = 0x9;
            page.recompute_checksum();
            Ok(())
        })
        .unwrap();
        bpm.flush_page(page_id).unwrap();
        let value = bpm.with_page(page_id, |page| page.payload()[1]).unwrap();
        assert_eq!(value, 0x9);
    }

    #[test]
    fn stats_count_disk_writes_and_reads_across_an_eviction() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(SyncDiskManager::open(dir.path().join("data.pages")).unwrap());
        let wal = LogManager::open(&dir.path().join("wal.log"), WalSyncMode::EveryWrite, 0).unwrap();
        let stats = Arc::new(talus_common::EngineStats::new());
        let bpm = BufferPoolManager::with_stats(disk, wal, 1, stats.clone());

        let (first_id, ()) = bpm.new_page(PageKind::Data, |_| Ok(())).unwrap();
        // Forces the only frame to be evicted (written back) and the first
        // page to be read back in from disk.
        let (_second_id, ()) = bpm.new_page(PageKind::Data, |_| Ok(())).unwrap();
        bpm.with_page(first_id, |_| ()).unwrap();

        let snapshot = stats.snapshot(0, 0);
        assert!(snapshot.total_writes >= 1);
        assert!(snapshot.total_reads >= 1);
        assert_eq!(snapshot.checksum_failures, 0);
    }

    #[test]
    fn reading_a_corrupted_page_surfaces_as_corruption_and_counts_a_failure() {
        let dir = tempdir().unwrap();
        let data_path = dir.path().join("data.pages");
        let disk = Arc::new(SyncDiskManager::open(&data_path).unwrap());
        let wal = LogManager::open(&dir.path().join("wal.log"), WalSyncMode::EveryWrite, 0).unwrap();
        let stats = Arc::new(talus_common::EngineStats::new());
        let bpm = BufferPoolManager::with_stats(disk, wal, 1, stats.clone());

        let (page_id, ()) = bpm
            .new_page(PageKind::Data, |page| {
                page.payload_mut()[0] = 0x7;
                page.recompute_checksum();
                Ok(())
            })
            .unwrap();
        bpm.flush_page(page_id).unwrap();

        // Flip a payload byte on disk directly, behind the buffer pool's
        // back, so the stored checksum no longer matches.
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).open(&data_path).unwrap();
        file.seek(SeekFrom::Start(talus_common::PAGE_HEADER_SIZE as u64)).unwrap();
        file.write_all(&[0xFF]).unwrap();
        drop(file);

        // Force eviction of the cached frame so the next read goes to disk.
        let (_other_id, ()) = bpm.new_page(PageKind::Data, |_| Ok(())).unwrap();
        let err = bpm.with_page(page_id, |_| ()).unwrap_err();
        assert!(matches!(err, EngineError::Corruption(_)));
        assert_eq!(stats.snapshot(0, 0).checksum_failures, 1);
    }
}
