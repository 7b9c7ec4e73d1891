//! Durable float-vector storage plus the in-memory ANN index over it
//! (§4.5). Vectors live in their own parallel record space — a dedicated
//! `RecordStore` instance over its own page chain — so the key-value store
//! and the vector store never share a keyspace.
use std::sync::{Arc, Mutex};

use talus_common::{DistanceMetric, EngineError, HnswParams, PageId, Result, VectorStats};
use talus_compute::BufferPoolManager;
use talus_wal::LogManager;

use crate::hnsw::{self, HnswGraph};
use crate::record_store::RecordStore;
use crate::txn::TxnIdAllocator;

pub struct VectorStore {
    records: RecordStore,
    graph: Mutex<HnswGraph>,
    dimension: usize,
    metric: DistanceMetric,
}

impl VectorStore {
    /// Rebuild a vector store over `pages`. The graph is reconstructed by
    /// replaying every stored vector through `HnswGraph::insert` in the
    /// record store's scan order (lexicographic by key) rather than
    /// original insertion order — a documented simplification: the
    /// resulting graph's shape differs from the one that built up
    /// incrementally, but every structural invariant in §4.5 still holds.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        wal: Arc<LogManager>,
        txn_ids: Arc<TxnIdAllocator>,
        pages: Vec<PageId>,
        dimension: usize,
        metric: DistanceMetric,
        params: HnswParams,
    ) -> Result<VectorStore> {
        let records = RecordStore::open(bpm, wal, txn_ids, pages, talus_common::PageKind::VectorRecord)?;
        let mut graph = HnswGraph::new(metric, params);
        let mut rng = rand::thread_rng();
        for (key, value) in records.get_all_entries()? {
            let vector = decode_vector(&value)?;
            graph.insert(&key, vector, &mut rng);
        }
        Ok(VectorStore {
            records,
            graph: Mutex::new(graph),
            dimension,
            metric,
        })
    }

    pub fn page_ids(&self) -> Vec<PageId> {
        self.records.page_ids()
    }

    pub fn put_vector(&self, key: &[u8], vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(EngineError::dimension_mismatch(self.dimension, vector.len()));
        }
        let prepared = hnsw::prepare_vector(self.metric, vector);
        self.records.put(key, &encode_vector(&prepared))?;
        let mut rng = rand::thread_rng();
        self.graph.lock().unwrap().insert(key, prepared, &mut rng);
        Ok(())
    }

    pub fn get_vector(&self, key: &[u8]) -> Result<Option<Vec<f32>>> {
        match self.records.get(key)? {
            Some(bytes) => Ok(Some(decode_vector(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_all_vectors(&self) -> Result<Vec<(Vec<u8>, Vec<f32>)>> {
        self.records
            .get_all_entries()?
            .into_iter()
            .map(|(key, bytes)| decode_vector(&bytes).map(|v| (key, v)))
            .collect()
    }

    pub fn search_similar(&self, query: &[f32], k: usize, ef_search: Option<usize>) -> Result<Vec<(Vec<u8>, f32)>> {
        if query.len() != self.dimension {
            return Err(EngineError::dimension_mismatch(self.dimension, query.len()));
        }
        let prepared = hnsw::prepare_vector(self.metric, query);
        let graph = self.graph.lock().unwrap();
        let ef = ef_search.unwrap_or_else(|| graph.ef_search());
        Ok(graph.search(&prepared, k, ef.max(k)))
    }

    pub fn stats(&self) -> VectorStats {
        let graph = self.graph.lock().unwrap();
        let num_vectors = graph.len() as u64;
        let num_layers = graph.num_layers();
        let avg_connections_per_node = graph.avg_connections_per_node();
        VectorStats {
            index_enabled: true,
            num_vectors,
            dimension: self.dimension,
            metric: self.metric,
            num_layers,
            avg_connections_per_node,
        }
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for component in vector {
        bytes.extend_from_slice(&component.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(EngineError::Corruption("vector record length not a multiple of 4".into()));
    }
    Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
}
