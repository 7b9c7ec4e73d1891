//! The Engine façade (§6): the only surface an external adapter (HTTP
//! server, shell, client library) is meant to consume.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use talus_common::{
    EngineConfig, EngineError, EngineStats, EngineStatsSnapshot, Result, VectorStats, WalSyncMode,
};
use talus_compute::BufferPoolManager;
use talus_pagestore::{PageIo, SyncDiskManager};
use talus_wal::LogManager;
use tracing::info;

use crate::manifest::Manifest;
use crate::record_store::{RecordStore, WriteOp};
use crate::recovery;
use crate::txn::TxnIdAllocator;
use crate::vector_store::VectorStore;

/// Options accepted by `Engine::scan` (§6 `scan`).
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub limit: Option<usize>,
    pub reverse: bool,
    pub keys_only: bool,
}

pub struct Engine {
    config: EngineConfig,
    disk: Arc<dyn PageIo>,
    wal: Arc<LogManager>,
    bpm: Arc<BufferPoolManager>,
    records: RecordStore,
    vectors: Option<VectorStore>,
    manifest_path: std::path::PathBuf,
    manifest_lock: Mutex<()>,
    stats: Arc<EngineStats>,
    closed: AtomicBool,
}

impl Engine {
    /// Open (creating if necessary) an engine rooted at `config.root_dir`,
    /// running crash recovery before any store is reconstructed.
    pub fn open(config: EngineConfig) -> Result<Engine> {
        config.ensure_directories()?;
        let manifest_path = config.manifest_path();
        let manifest = Manifest::load_or_default(&manifest_path)?;

        let disk: Arc<dyn PageIo> = Arc::new(SyncDiskManager::open(config.data_file_path())?);
        let (wal, report) = recovery::recover(disk.as_ref(), &config.wal_file_path(), config.wal_sync_mode)?;
        info!(
            records_scanned = report.records_scanned,
            pages_redone = report.pages_redone,
            records_undone = report.records_undone,
            loser_txns = report.loser_txns,
            "recovery complete"
        );

        let stats = Arc::new(EngineStats::new());
        let bpm = Arc::new(BufferPoolManager::with_stats(disk.clone(), wal.clone(), config.buffer_pool_size, stats.clone()));
        let txn_ids = Arc::new(TxnIdAllocator::new(0));

        let records = RecordStore::open(bpm.clone(), wal.clone(), txn_ids.clone(), manifest.record_store_pages.clone(), talus_common::PageKind::Data)?;
        let vectors = if config.vector.enabled {
            Some(VectorStore::open(
                bpm.clone(),
                wal.clone(),
                txn_ids.clone(),
                manifest.vector_store_pages.clone(),
                config.vector.dimension,
                config.vector.metric,
                config.vector.hnsw,
            )?)
        } else {
            None
        };

        let engine = Engine {
            config,
            disk,
            wal,
            bpm,
            records,
            vectors,
            manifest_path,
            manifest_lock: Mutex::new(()),
            stats,
            closed: AtomicBool::new(false),
        };
        engine.save_manifest()?;
        engine.wal.append_checkpoint(&[])?;
        Ok(engine)
    }

    /// Flush every dirty frame and fsync the WAL, leaving the engine in a
    /// state a subsequent `open` can recover from cleanly.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bpm.flush_all_pages()?;
        self.wal.sync_now()?;
        self.save_manifest()
    }

    fn save_manifest(&self) -> Result<()> {
        let _guard = self.manifest_lock.lock().unwrap();
        let manifest = Manifest {
            record_store_pages: self.records.page_ids(),
            vector_store_pages: self.vectors.as_ref().map(|v| v.page_ids()).unwrap_or_default(),
            last_checkpoint_lsn: self.wal.durable_lsn(),
        };
        manifest.save(&self.manifest_path)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let start = Instant::now();
        self.records.put(key, value)?;
        self.stats.record_put(start.elapsed().as_micros() as u64);
        self.save_manifest()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = Instant::now();
        let result = self.records.get(key)?;
        self.stats.record_get(start.elapsed().as_micros() as u64);
        Ok(result)
    }

    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let existed = self.records.delete(key)?;
        self.save_manifest()?;
        Ok(existed)
    }

    pub fn batch_write(&self, ops: &[WriteOp]) -> Result<()> {
        self.records.batch_write(ops)?;
        self.save_manifest()
    }

    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>, options: ScanOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = self.records.scan(start, end, options.limit, options.reverse)?;
        if options.keys_only {
            for (_, value) in &mut results {
                value.clear();
            }
        }
        Ok(results)
    }

    pub fn get_all_entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.records.get_all_entries()
    }

    pub fn put_vector(&self, key: &[u8], vector: &[f32]) -> Result<()> {
        let vectors = self.require_vectors()?;
        vectors.put_vector(key, vector)?;
        self.save_manifest()
    }

    pub fn get_vector(&self, key: &[u8]) -> Result<Option<Vec<f32>>> {
        self.require_vectors()?.get_vector(key)
    }

    pub fn search_similar(&self, query: &[f32], k: usize, _include_distances: bool) -> Result<Vec<(Vec<u8>, f32)>> {
        self.require_vectors()?.search_similar(query, k, None)
    }

    pub fn get_all_vectors(&self) -> Result<Vec<(Vec<u8>, Vec<f32>)>> {
        self.require_vectors()?.get_all_vectors()
    }

    fn require_vectors(&self) -> Result<&VectorStore> {
        self.vectors
            .as_ref()
            .ok_or_else(|| EngineError::Unimplemented("vector index is not enabled for this engine".into()))
    }

    pub fn get_stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot(self.disk.page_count(), self.records.len() as u64)
    }

    pub fn get_vector_stats(&self) -> VectorStats {
        match &self.vectors {
            Some(vectors) => vectors.stats(),
            None => VectorStats {
                index_enabled: false,
                num_vectors: 0,
                dimension: self.config.vector.dimension,
                metric: self.config.vector.metric,
                num_layers: 0,
                avg_connections_per_node: 0.0,
            },
        }
    }

    pub fn wal_sync_mode(&self) -> WalSyncMode {
        self.config.wal_sync_mode
    }

    pub fn page_count(&self) -> u64 {
        self.disk.page_count()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(?err, "engine close failed during drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talus_common::DistanceMetric;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> EngineConfig {
        let mut cfg = EngineConfig::new(dir);
        cfg.buffer_pool_size = 16;
        cfg
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(config(dir.path())).unwrap();
        engine.put(b"a", b"1").unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn reopening_after_close_recovers_committed_data() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(config(dir.path())).unwrap();
            engine.put(b"a", b"1").unwrap();
            engine.close().unwrap();
        }
        let engine = Engine::open(config(dir.path())).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn delete_then_get_returns_none_and_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let engine = Engine::open(config(dir.path())).unwrap();
            engine.put(b"a", b"1").unwrap();
            assert!(engine.delete(b"a").unwrap());
            engine.close().unwrap();
        }
        let engine = Engine::open(config(dir.path())).unwrap();
        assert_eq!(engine.get(b"a").unwrap(), None);
    }

    #[test]
    fn scan_with_limit_and_reverse() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(config(dir.path())).unwrap();
        for key in [b"a", b"b", b"c"] {
            engine.put(key, b"v").unwrap();
        }
        let forward = engine.scan(None, None, ScanOptions { limit: Some(2), ..Default::default() }).unwrap();
        assert_eq!(forward.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"b".to_vec()]);

        let backward = engine.scan(None, None, ScanOptions { reverse: true, limit: Some(2), ..Default::default() }).unwrap();
        assert_eq!(backward.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(), vec![b"c".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn batch_write_is_all_or_nothing_on_success() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(config(dir.path())).unwrap();
        engine
            .batch_write(&[WriteOp::Put(b"a".to_vec(), b"1".to_vec()), WriteOp::Put(b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn vector_operations_fail_when_index_disabled() {
        let dir = tempdir().unwrap();
        let engine = Engine::open(config(dir.path())).unwrap();
        let err = engine.put_vector(b"a", &[1.0]).unwrap_err();
        assert!(matches!(err, EngineError::Unimplemented(_)));
    }

    #[test]
    fn vector_self_match_search_with_index_enabled() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg = cfg.with_vector_index(4, DistanceMetric::Euclidean);
        let engine = Engine::open(cfg).unwrap();
        engine.put_vector(b"a", &[1.0, 2.0, 3.0, 4.0]).unwrap();
        engine.put_vector(b"b", &[5.0, 6.0, 7.0, 8.0]).unwrap();
        engine.put_vector(b"c", &[9.0, 10.0, 11.0, 12.0]).unwrap();

        let results = engine.search_similar(&[1.0, 2.0, 3.0, 4.0], 1, true).unwrap();
        assert_eq!(results[0].0, b"a");
    }

    #[test]
    fn dimension_mismatch_rejected_and_key_absent_after() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg = cfg.with_vector_index(4, DistanceMetric::Euclidean);
        let engine = Engine::open(cfg).unwrap();
        let err = engine.put_vector(b"x", &[1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert_eq!(engine.get_vector(b"x").unwrap(), None);
    }
}
