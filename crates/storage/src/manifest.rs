//! Durable root pointers: which data pages belong to the record store and
//! the vector store, persisted outside the page file so the engine knows
//! where to resume scanning on open (§6 "Engine").
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use talus_common::{EngineError, Lsn, PageId, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub record_store_pages: Vec<PageId>,
    pub vector_store_pages: Vec<PageId>,
    /// LSN of the last checkpoint written at a clean open or close. Recovery
    /// does not currently use this as an Analysis start point (it always
    /// scans the WAL from the front) — see DESIGN.md's checkpoint-based
    /// Analysis open question.
    pub last_checkpoint_lsn: Lsn,
}

impl Manifest {
    pub fn load_or_default(path: &Path) -> Result<Manifest> {
        match fs::read(path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| EngineError::Corruption(format!("manifest decode: {e}")))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
            Err(err) => Err(EngineError::Io(err)),
        }
    }

    /// Write new, fsync, rename over old — so a crash can only ever see the
    /// previous manifest or this one in full, never a half-written one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| EngineError::Other(format!("manifest encode: {e}")))?;
        let tmp_path = tmp_path_for(path);
        fs::write(&tmp_path, &bytes)?;
        File::open(&tmp_path)?.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_manifest_loads_as_default() {
        let dir = tempdir().unwrap();
        let manifest = Manifest::load_or_default(&dir.path().join("manifest.json")).unwrap();
        assert!(manifest.record_store_pages.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = Manifest {
            record_store_pages: vec![1, 2, 3],
            vector_store_pages: vec![4],
            last_checkpoint_lsn: 7,
        };
        manifest.save(&path).unwrap();
        let loaded = Manifest::load_or_default(&path).unwrap();
        assert_eq!(loaded.record_store_pages, vec![1, 2, 3]);
        assert_eq!(loaded.vector_store_pages, vec![4]);
        assert_eq!(loaded.last_checkpoint_lsn, 7);
    }

    #[test]
    fn save_does_not_leave_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        Manifest::default().save(&path).unwrap();
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }
}
