//! In-memory hierarchical proximity graph for approximate nearest-neighbor
//! search over stored vectors (§4.5).
//!
//! The graph is rebuilt by replaying every `put_vector` in insertion order
//! when the vector store is opened, rather than serializing the adjacency
//! lists themselves — see `vector_store::VectorStore::open`.
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use talus_common::{DistanceMetric, HnswParams};

struct Node {
    key: Vec<u8>,
    vector: Vec<f32>,
    top_level: usize,
    neighbors: Vec<Vec<usize>>,
}

/// Hierarchical small-world graph keyed by opaque byte-string keys.
pub struct HnswGraph {
    metric: DistanceMetric,
    params: HnswParams,
    nodes: Vec<Node>,
    key_to_id: HashMap<Vec<u8>, usize>,
    entry_point: Option<usize>,
    top_level: usize,
}

#[derive(Clone, Copy, PartialEq)]
struct Candidate {
    id: usize,
    distance: f32,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Min-heap ordering wrapper: `BinaryHeap` is a max-heap, so candidates
/// destined for a "closest first" heap are reversed.
#[derive(Clone, Copy, PartialEq)]
struct Reverse(Candidate);

impl Eq for Reverse {}
impl PartialOrd for Reverse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Reverse {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

impl HnswGraph {
    pub fn new(metric: DistanceMetric, params: HnswParams) -> HnswGraph {
        HnswGraph {
            metric,
            params,
            nodes: Vec::new(),
            key_to_id: HashMap::new(),
            entry_point: None,
            top_level: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn ef_search(&self) -> usize {
        self.params.ef_search
    }

    pub fn num_layers(&self) -> usize {
        if self.nodes.is_empty() {
            0
        } else {
            self.top_level + 1
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// Mean out-degree across every node's layer-0 adjacency list.
    pub fn avg_connections_per_node(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let total: usize = self.nodes.iter().map(|n| n.neighbors[0].len()).sum();
        total as f64 / self.nodes.len() as f64
    }

    /// Insert or replace `key`'s vector. `vector` must already be the
    /// metric's stored representation (cosine callers normalize first).
    pub fn insert(&mut self, key: &[u8], vector: Vec<f32>, rng: &mut impl Rng) {
        if let Some(&existing) = self.key_to_id.get(key) {
            self.remove_edges_to(existing);
            self.nodes[existing].vector = vector;
            self.relink(existing, rng);
            return;
        }

        let new_level = sample_level(self.params.m, rng);
        let id = self.nodes.len();
        self.nodes.push(Node {
            key: key.to_vec(),
            vector,
            top_level: new_level,
            neighbors: vec![Vec::new(); new_level + 1],
        });
        self.key_to_id.insert(key.to_vec(), id);

        if self.entry_point.is_none() {
            self.entry_point = Some(id);
            self.top_level = new_level;
            return;
        }

        self.link_new_node(id, new_level, rng);
    }

    fn relink(&mut self, id: usize, rng: &mut impl Rng) {
        let new_level = self.nodes[id].top_level;
        self.nodes[id].neighbors = vec![Vec::new(); new_level + 1];
        if self.entry_point == Some(id) {
            return;
        }
        self.link_new_node(id, new_level, rng);
    }

    fn link_new_node(&mut self, id: usize, new_level: usize, _rng: &mut impl Rng) {
        let query = self.nodes[id].vector.clone();
        let mut cur = self.entry_point.unwrap();
        let mut cur_dist = self.distance_to(&query, cur);

        for layer in ((new_level + 1)..=self.top_level).rev() {
            loop {
                let mut improved = false;
                for &neighbor in &self.nodes[cur].neighbors[layer].clone() {
                    let d = self.distance_to(&query, neighbor);
                    if d < cur_dist {
                        cur = neighbor;
                        cur_dist = d;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        for layer in (0..=new_level.min(self.top_level)).rev() {
            let candidates = self.search_layer(&query, cur, self.params.ef_construction, layer);
            let selected = self.select_neighbors(&query, &candidates, self.params.max_connections(layer));

            self.nodes[id].neighbors[layer] = selected.clone();
            for &neighbor in &selected {
                self.add_edge(neighbor, id, layer);
            }
            if let Some(&closest) = selected.first() {
                cur = closest;
            }
        }

        if new_level > self.top_level {
            self.entry_point = Some(id);
            self.top_level = new_level;
        }
    }

    fn add_edge(&mut self, node: usize, new_neighbor: usize, layer: usize) {
        self.nodes[node].neighbors[layer].push(new_neighbor);
        let cap = self.params.max_connections(layer);
        if self.nodes[node].neighbors[layer].len() > cap {
            let query = self.nodes[node].vector.clone();
            let candidates: Vec<Candidate> = self.nodes[node].neighbors[layer]
                .iter()
                .map(|&id| Candidate { id, distance: self.distance_to(&query, id) })
                .collect();
            let pruned = self.select_neighbors(&query, &candidates, cap);
            self.nodes[node].neighbors[layer] = pruned;
        }
    }

    fn remove_edges_to(&mut self, id: usize) {
        for layer in 0..self.nodes[id].neighbors.len() {
            let neighbors = self.nodes[id].neighbors[layer].clone();
            for neighbor in neighbors {
                if let Some(layer_edges) = self.nodes[neighbor].neighbors.get_mut(layer) {
                    layer_edges.retain(|&n| n != id);
                }
            }
        }
    }

    /// HNSW's standard "not dominated by a closer selected neighbor"
    /// heuristic: walk candidates closest-first, keep one only if it isn't
    /// closer to an already-selected neighbor than to the query itself.
    fn select_neighbors(&self, query: &[f32], candidates: &[Candidate], max: usize) -> Vec<usize> {
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));

        let mut selected: Vec<usize> = Vec::new();
        for candidate in sorted {
            if selected.len() >= max {
                break;
            }
            let dominated = selected.iter().any(|&s| self.distance_between(candidate.id, s) < candidate.distance);
            if !dominated {
                selected.push(candidate.id);
            }
        }

        if selected.len() < max {
            let mut fallback = candidates.to_vec();
            fallback.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
            for candidate in fallback {
                if selected.len() >= max {
                    break;
                }
                if !selected.contains(&candidate.id) {
                    selected.push(candidate.id);
                }
            }
        }
        selected.sort_by(|&a, &b| {
            self.distance_to(query, a)
                .partial_cmp(&self.distance_to(query, b))
                .unwrap_or(Ordering::Equal)
        });
        selected
    }

    /// Bounded best-first search at a single layer, starting from `entry`.
    fn search_layer(&self, query: &[f32], entry: usize, ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(entry);

        let entry_dist = self.distance_to(query, entry);
        let mut candidates = BinaryHeap::new();
        candidates.push(Reverse(Candidate { id: entry, distance: entry_dist }));
        let mut best = BinaryHeap::new();
        best.push(Candidate { id: entry, distance: entry_dist });

        while let Some(Reverse(current)) = candidates.pop() {
            let worst_best = best.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
            if current.distance > worst_best && best.len() >= ef {
                break;
            }
            let neighbors = if layer < self.nodes[current.id].neighbors.len() {
                self.nodes[current.id].neighbors[layer].clone()
            } else {
                Vec::new()
            };
            for neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let d = self.distance_to(query, neighbor);
                let worst_best = best.peek().map(|c| c.distance).unwrap_or(f32::INFINITY);
                if best.len() < ef || d < worst_best {
                    candidates.push(Reverse(Candidate { id: neighbor, distance: d }));
                    best.push(Candidate { id: neighbor, distance: d });
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut result: Vec<Candidate> = best.into_vec();
        result.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        result
    }

    /// Top-`k` nearest neighbors to `query` (already in the metric's stored
    /// representation), ties broken by key byte order.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(Vec<u8>, f32)> {
        let entry = match self.entry_point {
            Some(id) => id,
            None => return Vec::new(),
        };

        let mut cur = entry;
        let mut cur_dist = self.distance_to(query, entry);
        for layer in (1..=self.top_level).rev() {
            loop {
                let mut improved = false;
                for &neighbor in &self.nodes[cur].neighbors[layer].clone() {
                    let d = self.distance_to(query, neighbor);
                    if d < cur_dist {
                        cur = neighbor;
                        cur_dist = d;
                        improved = true;
                    }
                }
                if !improved {
                    break;
                }
            }
        }

        let ef = ef_search.max(k);
        let mut candidates = self.search_layer(query, cur, ef, 0);
        candidates.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| self.nodes[a.id].key.cmp(&self.nodes[b.id].key))
        });
        candidates
            .into_iter()
            .take(k)
            .map(|c| (self.nodes[c.id].key.clone(), c.distance))
            .collect()
    }

    fn distance_to(&self, query: &[f32], node: usize) -> f32 {
        distance(self.metric, query, &self.nodes[node].vector)
    }

    fn distance_between(&self, a: usize, b: usize) -> f32 {
        distance(self.metric, &self.nodes[a].vector, &self.nodes[b].vector)
    }
}

/// Draw a level from a geometric distribution with parameter `1/ln(m)`, so
/// roughly one in `m` nodes is promoted to the next layer.
fn sample_level(m: usize, rng: &mut impl Rng) -> usize {
    let m_l = 1.0 / (m as f64).ln();
    let uniform: f64 = rng.gen_range(f64::EPSILON..1.0);
    (-uniform.ln() * m_l).floor() as usize
}

/// Prepare a vector for storage/comparison under `metric` — cosine vectors
/// are normalized once at insert time so the metric reduces to `1 - dot`.
pub fn prepare_vector(metric: DistanceMetric, vector: &[f32]) -> Vec<f32> {
    match metric {
        DistanceMetric::Cosine => normalize(vector),
        _ => vector.to_vec(),
    }
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector.to_vec()
    } else {
        vector.iter().map(|v| v / norm).collect()
    }
}

pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - dot(a, b),
        DistanceMetric::Euclidean => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt(),
        DistanceMetric::DotProduct => -dot(a, b),
        DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn self_match_returns_zero_distance_under_euclidean() {
        let mut graph = HnswGraph::new(DistanceMetric::Euclidean, HnswParams::default());
        let mut rng = rng();
        graph.insert(b"a", vec![1.0, 2.0, 3.0, 4.0], &mut rng);
        graph.insert(b"b", vec![5.0, 6.0, 7.0, 8.0], &mut rng);
        graph.insert(b"c", vec![9.0, 10.0, 11.0, 12.0], &mut rng);

        let result = graph.search(&[1.0, 2.0, 3.0, 4.0], 1, 64);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].0, b"a");
        assert!(result[0].1.abs() < 1e-5);
    }

    #[test]
    fn every_node_stays_within_its_layer_connection_cap() {
        let mut graph = HnswGraph::new(DistanceMetric::Euclidean, HnswParams { m: 4, ef_construction: 32, ef_search: 16 });
        let mut rng = rng();
        for i in 0..200u32 {
            let v = vec![i as f32, (i * 2) as f32];
            graph.insert(i.to_le_bytes().as_slice(), v, &mut rng);
        }
        for node in &graph.nodes {
            for (layer, neighbors) in node.neighbors.iter().enumerate() {
                assert!(neighbors.len() <= graph.params.max_connections(layer));
            }
        }
    }

    #[test]
    fn entry_point_level_matches_global_top_level() {
        let mut graph = HnswGraph::new(DistanceMetric::Euclidean, HnswParams::default());
        let mut rng = rng();
        for i in 0..50u32 {
            graph.insert(i.to_le_bytes().as_slice(), vec![i as f32], &mut rng);
        }
        let entry = graph.entry_point.unwrap();
        assert_eq!(graph.nodes[entry].top_level, graph.top_level);
    }

    #[test]
    fn k_nearest_results_are_sorted_ascending_by_distance() {
        let mut graph = HnswGraph::new(DistanceMetric::Euclidean, HnswParams::default());
        let mut rng = rng();
        for i in 0..30u32 {
            graph.insert(i.to_le_bytes().as_slice(), vec![i as f32], &mut rng);
        }
        let result = graph.search(&[15.0], 5, 64);
        for pair in result.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn cosine_vectors_are_normalized_before_storage() {
        let normalized = prepare_vector(DistanceMetric::Cosine, &[3.0, 4.0]);
        let norm = (normalized[0].powi(2) + normalized[1].powi(2)).sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
