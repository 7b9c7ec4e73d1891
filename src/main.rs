//! Small scripted demonstration of the engine: open a database under a
//! temporary directory, run a handful of key-value and vector operations,
//! then print the resulting stats.
use anyhow::Result;
use talus_common::{DistanceMetric, EngineConfig};
use talus_storage::Engine;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = tempfile::tempdir()?;
    let config = EngineConfig::new(dir.path()).with_vector_index(4, DistanceMetric::Cosine);
    let engine = Engine::open(config)?;

    engine.put(b"hello", b"world")?;
    engine.put(b"answer", b"42")?;
    tracing::info!(value = ?engine.get(b"hello")?, "read back hello");

    engine.put_vector(b"doc-1", &[0.1, 0.2, 0.3, 0.4])?;
    engine.put_vector(b"doc-2", &[0.9, 0.1, 0.0, 0.2])?;
    let neighbors = engine.search_similar(&[0.1, 0.2, 0.3, 0.4], 2, true)?;
    tracing::info!(?neighbors, "nearest vectors to doc-1's embedding");

    let stats = engine.get_stats();
    tracing::info!(?stats, "engine stats");
    engine.close()?;
    Ok(())
}
