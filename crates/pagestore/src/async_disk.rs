//! Optional async wrapper over `SyncDiskManager` for callers embedding the
//! engine in a tokio runtime (§5: the engine core stays synchronous; this is
//! strictly an adapter, not a second implementation of the page file).
#![cfg(feature = "async-disk")]

use std::sync::Arc;

use talus_common::{EngineError, Page, PageId, Result};

use crate::pagefile::{PageIo, SyncDiskManager};

/// Runs every `SyncDiskManager` call on tokio's blocking pool. Holding this
/// instead of a bare `SyncDiskManager` lets an async caller avoid blocking
/// its reactor thread on file I/O; it does not change the on-disk format or
/// the synchronous buffer pool's locking.
#[derive(Clone)]
pub struct AsyncDiskManager {
    inner: Arc<SyncDiskManager>,
}

impl AsyncDiskManager {
    pub fn new(inner: Arc<SyncDiskManager>) -> AsyncDiskManager {
        AsyncDiskManager { inner }
    }

    pub async fn read_page(&self, page_id: PageId) -> Result<Page> {
        let inner = self.inner.clone();
        spawn_blocking_result(move || inner.read_page(page_id)).await
    }

    pub async fn write_page(&self, page_id: PageId, page: Page) -> Result<()> {
        let inner = self.inner.clone();
        spawn_blocking_result(move || inner.write_page(page_id, &page)).await
    }

    pub async fn allocate_page(&self) -> Result<PageId> {
        let inner = self.inner.clone();
        spawn_blocking_result(move || inner.allocate_page()).await
    }

    pub async fn sync(&self) -> Result<()> {
        let inner = self.inner.clone();
        spawn_blocking_result(move || inner.sync()).await
    }

    /// Submits every read onto the blocking pool concurrently, then awaits
    /// them in `ids`' order — the same byte-identical result a serial
    /// `SyncDiskManager::read_pages_batch` would produce, just not blocking
    /// the caller's reactor thread while the reads are in flight.
    pub async fn read_pages_batch(&self, ids: &[PageId]) -> Result<Vec<Page>> {
        let tasks: Vec<_> = ids
            .iter()
            .map(|&id| {
                let inner = self.inner.clone();
                tokio::task::spawn_blocking(move || inner.read_page(id))
            })
            .collect();

        let mut pages = Vec::with_capacity(tasks.len());
        for task in tasks {
            let page = task
                .await
                .map_err(|join_err| EngineError::Other(format!("blocking disk task panicked: {join_err}")))??;
            pages.push(page);
        }
        Ok(pages)
    }

    /// Symmetric to `read_pages_batch`.
    pub async fn write_pages_batch(&self, ids: &[PageId], pages: &[Page]) -> Result<()> {
        let tasks: Vec<_> = ids
            .iter()
            .zip(pages)
            .map(|(&id, page)| {
                let inner = self.inner.clone();
                let page = page.clone();
                tokio::task::spawn_blocking(move || inner.write_page(id, &page))
            })
            .collect();

        for task in tasks {
            task.await
                .map_err(|join_err| EngineError::Other(format!("blocking disk task panicked: {join_err}")))??;
        }
        Ok(())
    }
}

async fn spawn_blocking_result<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|join_err| EngineError::Other(format!("blocking disk task panicked: {join_err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn allocate_and_round_trip_through_blocking_pool() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(SyncDiskManager::open(dir.path().join("data.pages")).unwrap());
        let async_disk = AsyncDiskManager::new(disk);

        let page_id = async_disk.allocate_page().await.unwrap();
        let mut page = talus_common::Page::new_zeroed(page_id, talus_common::PageKind::Data);
        page.payload_mut()[0] = 9;
        page.recompute_checksum();
        async_disk.write_page(page_id, page).await.unwrap();

        let read_back = async_disk.read_page(page_id).await.unwrap();
        assert_eq!(read_back.payload()[0], 9);
    }

    #[tokio::test]
    async fn batch_read_preserves_input_order() {
        let dir = tempdir().unwrap();
        let disk = Arc::new(SyncDiskManager::open(dir.path().join("data.pages")).unwrap());
        let async_disk = AsyncDiskManager::new(disk);

        let mut ids = Vec::new();
        let mut pages = Vec::new();
        for i in 0..3u8 {
            let page_id = async_disk.allocate_page().await.unwrap();
            let mut page = talus_common::Page::new_zeroed(page_id, talus_common::PageKind::Data);
            page.payload_mut()[0] = i;
            page.recompute_checksum();
            async_disk.write_page(page_id, page.clone()).await.unwrap();
            ids.push(page_id);
            pages.push(page);
        }

        let read_back = async_disk.read_pages_batch(&ids).await.unwrap();
        for (i, page) in read_back.iter().enumerate() {
            assert_eq!(page.payload()[0], i as u8);
        }
    }
}
