//! The Engine's programmatic configuration surface (§6). There is
//! deliberately no file-format parsing here — loading a config from TOML,
//! env vars, or CLI flags is an adapter's job, not the core's.

use std::path::{Path, PathBuf};

/// Durability policy at the WAL boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncMode {
    /// Never fsync. Test-only; a crash can lose any amount of "durable" data.
    None,
    /// Fsync within every write path before it returns success.
    EveryWrite,
    /// Fsync on a background timer; writes return before the fsync lands.
    Periodic,
}

impl Default for WalSyncMode {
    fn default() -> Self {
        WalSyncMode::EveryWrite
    }
}

/// Distance metric used by the vector index (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    Euclidean,
    DotProduct,
    Manhattan,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Euclidean
    }
}

/// HNSW construction/search parameters (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Max neighbors per node per layer (layer ≥ 1); layer 0 gets `2 * m`.
    pub m: usize,
    /// Candidate-set size used while inserting.
    pub ef_construction: usize,
    /// Candidate-set size used while searching.
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        HnswParams {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl HnswParams {
    pub fn max_connections(&self, level: usize) -> usize {
        if level == 0 {
            2 * self.m
        } else {
            self.m
        }
    }
}

/// Vector subsystem configuration.
#[derive(Debug, Clone, Copy)]
pub struct VectorConfig {
    pub enabled: bool,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub hnsw: HnswParams,
}

impl Default for VectorConfig {
    fn default() -> Self {
        VectorConfig {
            enabled: false,
            dimension: 0,
            metric: DistanceMetric::default(),
            hnsw: HnswParams::default(),
        }
    }
}

/// Top-level Engine configuration (§6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root_dir: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub wal_dir: Option<PathBuf>,
    /// Accepted for forward compatibility with an external packaging layer;
    /// consulted nowhere in the core (§9 open question — storage semantics
    /// are unaffected by this flag, the layout is always a flat page file).
    pub use_level_directories: bool,
    pub buffer_pool_size: usize,
    pub block_cache_size_bytes: usize,
    pub l0_compaction_trigger: usize,
    pub wal_sync_mode: WalSyncMode,
    pub vector: VectorConfig,
}

impl EngineConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> EngineConfig {
        EngineConfig {
            root_dir: root_dir.into(),
            data_dir: None,
            wal_dir: None,
            use_level_directories: false,
            buffer_pool_size: 256,
            block_cache_size_bytes: 64 * 1024 * 1024,
            l0_compaction_trigger: 4,
            wal_sync_mode: WalSyncMode::default(),
            vector: VectorConfig::default(),
        }
    }

    pub fn with_vector_index(mut self, dimension: usize, metric: DistanceMetric) -> EngineConfig {
        self.vector.enabled = true;
        self.vector.dimension = dimension;
        self.vector.metric = metric;
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| self.root_dir.clone())
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.wal_dir.clone().unwrap_or_else(|| self.root_dir.clone())
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.data_dir().join("data.pages")
    }

    pub fn wal_file_path(&self) -> PathBuf {
        self.wal_dir().join("wal.log")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root_dir.join("manifest.json")
    }

    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in [self.root_dir.as_path(), self.data_dir().as_path(), self.wal_dir().as_path()] {
            ensure_dir(dir)?;
        }
        Ok(())
    }
}

fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
