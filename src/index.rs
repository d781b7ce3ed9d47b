/// HNSW index over stable integer ids
///
/// The graph never deletes: stale ids stay in it until the owner rebuilds
/// from its live set. Ids are the only link to the metadata store.
use chrono::{DateTime, Utc};
use hnsw_rs::api::AnnT;
use hnsw_rs::hnswio::HnswIo;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

/// Upper bound on HNSW layers accepted by hnsw_rs
const MAX_LAYERS: usize = 16;
const MANIFEST_FILE: &str = "index.json";
const DUMP_BASENAME: &str = "vectors";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// HNSW construction and query parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Connections per node (M)
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    /// Capacity hint for graph allocation
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
        }
    }
}

/// Raw neighbour returned by the graph
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    /// Cosine distance in [0, 2]
    pub distance: f32,
}

impl Neighbor {
    /// Similarity in [0, 1]
    pub fn similarity(&self) -> f32 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}

/// Sidecar describing a dumped graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    /// Basename hnsw_rs actually wrote (it may differ from the requested one)
    pub basename: String,
    pub dimension: usize,
    pub point_count: usize,
    pub max_id: Option<u64>,
    pub params: HnswParams,
    pub saved_at: DateTime<Utc>,
}

/// HNSW vector index wrapper using cosine distance
pub struct AnnIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    params: HnswParams,
    count: AtomicUsize,
    /// Highest id inserted plus one, zero when empty
    id_ceiling: AtomicU64,
}

impl AnnIndex {
    pub fn new(dimension: usize, params: HnswParams) -> Self {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.m,
            params.max_elements,
            MAX_LAYERS,
            params.ef_construction,
            DistCosine,
        );

        Self {
            hnsw,
            dimension,
            params,
            count: AtomicUsize::new(0),
            id_ceiling: AtomicU64::new(0),
        }
    }

    /// Build a fresh graph containing exactly `items`
    pub fn build<'a, I>(dimension: usize, params: HnswParams, items: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = (u64, &'a [f32])>,
    {
        let index = Self::new(dimension, params);
        for (id, vector) in items {
            index.insert(id, vector)?;
        }
        Ok(index)
    }

    pub fn insert(&self, id: u64, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let data = vector.to_vec();
        self.hnsw.insert((&data, id as usize));

        self.count.fetch_add(1, Ordering::SeqCst);
        self.id_ceiling.fetch_max(id + 1, Ordering::SeqCst);
        Ok(())
    }

    /// Up to `k` nearest neighbours, closest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let ef = self.params.ef_search.max(k);
        let mut neighbors: Vec<Neighbor> = self
            .hnsw
            .search(query, k, ef)
            .into_iter()
            .map(|n| Neighbor {
                id: n.d_id as u64,
                distance: n.distance,
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(neighbors)
    }

    /// Number of points in the graph, stale ones included
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn params(&self) -> HnswParams {
        self.params
    }

    pub fn max_id(&self) -> Option<u64> {
        self.id_ceiling.load(Ordering::SeqCst).checked_sub(1)
    }

    /// Write the graph and its manifest into `dir`
    ///
    /// An empty graph writes only a manifest with `point_count: 0`; hnsw_rs
    /// cannot dump a graph without points.
    pub fn save(&self, dir: &Path) -> Result<IndexManifest, IndexError> {
        std::fs::create_dir_all(dir)?;

        if let Ok(previous) = Self::read_manifest(dir) {
            Self::remove_dump(dir, &previous.basename)?;
        }
        Self::remove_dump(dir, DUMP_BASENAME)?;

        let basename = if self.is_empty() {
            String::new()
        } else {
            self.hnsw
                .file_dump(dir, DUMP_BASENAME)
                .map_err(|e| IndexError::SerializationError(e.to_string()))?
        };

        let manifest = IndexManifest {
            basename,
            dimension: self.dimension,
            point_count: self.len(),
            max_id: self.max_id(),
            params: self.params,
            saved_at: Utc::now(),
        };

        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| IndexError::SerializationError(e.to_string()))?;
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, dir.join(MANIFEST_FILE))?;

        tracing::debug!(
            "Saved HNSW index ({} points) to {}",
            manifest.point_count,
            dir.display()
        );
        Ok(manifest)
    }

    /// Load a graph previously written by [`AnnIndex::save`]
    pub fn load(dir: &Path) -> Result<(Self, IndexManifest), IndexError> {
        let manifest = Self::read_manifest(dir)?;
        let ceiling = manifest.max_id.map_or(0, |id| id + 1);

        if manifest.point_count == 0 {
            let index = Self::new(manifest.dimension, manifest.params);
            index.id_ceiling.store(ceiling, Ordering::SeqCst);
            return Ok((index, manifest));
        }

        // The reloaded graph borrows from its loader, so the loader must outlive
        // the index. Loading happens once per store init.
        let loader: &'static mut HnswIo = Box::leak(Box::new(HnswIo::new(dir, &manifest.basename)));
        let hnsw: Hnsw<'static, f32, DistCosine> = loader
            .load_hnsw::<f32, DistCosine>()
            .map_err(|e| IndexError::SerializationError(e.to_string()))?;

        let count = hnsw.get_nb_point();

        let index = Self {
            hnsw,
            dimension: manifest.dimension,
            params: manifest.params,
            count: AtomicUsize::new(count),
            id_ceiling: AtomicU64::new(ceiling),
        };
        Ok((index, manifest))
    }

    /// Delete any dumped graph and manifest in `dir`
    pub fn remove_files(dir: &Path) -> Result<(), IndexError> {
        if let Ok(manifest) = Self::read_manifest(dir) {
            Self::remove_dump(dir, &manifest.basename)?;
        }
        Self::remove_dump(dir, DUMP_BASENAME)?;
        remove_if_exists(&dir.join(MANIFEST_FILE))
    }

    fn read_manifest(dir: &Path) -> Result<IndexManifest, IndexError> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Err(IndexError::IndexNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| IndexError::SerializationError(e.to_string()))
    }

    fn remove_dump(dir: &Path, basename: &str) -> Result<(), IndexError> {
        for path in dump_paths(dir, basename) {
            remove_if_exists(&path)?;
        }
        Ok(())
    }
}

fn dump_paths(dir: &Path, basename: &str) -> [PathBuf; 2] {
    [
        dir.join(format!("{}.hnsw.graph", basename)),
        dir.join(format!("{}.hnsw.data", basename)),
    ]
}

fn remove_if_exists(path: &Path) -> Result<(), IndexError> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_index_creation() {
        let index = AnnIndex::new(384, HnswParams::default());
        assert_eq!(index.dimension(), 384);
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.max_id(), None);
    }

    #[test]
    fn test_insert_and_search() {
        let index = AnnIndex::new(16, HnswParams::default());

        let mut close = unit(16, 0);
        close[1] = 0.1;

        index.insert(1, &unit(16, 0)).unwrap();
        index.insert(2, &unit(16, 1)).unwrap();
        index.insert(3, &close).unwrap();

        assert_eq!(index.len(), 3);
        assert_eq!(index.max_id(), Some(3));

        let results = index.search(&unit(16, 0), 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, 1);
        assert!(results[0].similarity() > 0.999);
        assert_eq!(results[1].id, 3);
    }

    #[test]
    fn test_search_empty_index() {
        let index = AnnIndex::new(8, HnswParams::default());
        assert!(index.search(&unit(8, 0), 5).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_validation() {
        let index = AnnIndex::new(384, HnswParams::default());
        assert!(index.insert(1, &[1.0; 128]).is_err());
        assert!(index.search(&[1.0; 128], 1).is_err());
    }

    #[test]
    fn test_build_from_items() {
        let vectors: Vec<(u64, Vec<f32>)> = (0..8).map(|i| (i * 10, unit(8, i as usize))).collect();
        let index = AnnIndex::build(
            8,
            HnswParams::default(),
            vectors.iter().map(|(id, v)| (*id, v.as_slice())),
        )
        .unwrap();

        assert_eq!(index.len(), 8);
        assert_eq!(index.max_id(), Some(70));
        assert_eq!(index.search(&unit(8, 3), 1).unwrap()[0].id, 30);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();

        {
            let index = AnnIndex::new(8, HnswParams::default());
            index.insert(42, &unit(8, 2)).unwrap();
            index.insert(7, &unit(8, 5)).unwrap();
            let manifest = index.save(temp.path()).unwrap();
            assert_eq!(manifest.point_count, 2);
        }

        let (index, manifest) = AnnIndex::load(temp.path()).unwrap();
        assert_eq!(index.dimension(), 8);
        assert_eq!(index.len(), 2);
        assert_eq!(manifest.max_id, Some(42));
        assert_eq!(index.search(&unit(8, 2), 1).unwrap()[0].id, 42);
    }

    #[test]
    fn test_save_twice_overwrites() {
        let temp = TempDir::new().unwrap();
        let index = AnnIndex::new(8, HnswParams::default());
        index.insert(1, &unit(8, 0)).unwrap();
        index.save(temp.path()).unwrap();
        index.insert(2, &unit(8, 1)).unwrap();
        index.save(temp.path()).unwrap();

        let (loaded, _) = AnnIndex::load(temp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_save_and_load_empty() {
        let temp = TempDir::new().unwrap();

        let index = AnnIndex::new(8, HnswParams::default());
        let manifest = index.save(temp.path()).unwrap();
        assert_eq!(manifest.point_count, 0);
        assert_eq!(manifest.max_id, None);

        let (loaded, _) = AnnIndex::load(temp.path()).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimension(), 8);
        assert!(loaded.search(&unit(8, 0), 3).unwrap().is_empty());

        loaded.insert(4, &unit(8, 1)).unwrap();
        assert_eq!(loaded.search(&unit(8, 1), 1).unwrap()[0].id, 4);
    }

    #[test]
    fn test_empty_save_replaces_previous_dump() {
        let temp = TempDir::new().unwrap();

        let full = AnnIndex::new(8, HnswParams::default());
        full.insert(1, &unit(8, 0)).unwrap();
        let previous = full.save(temp.path()).unwrap();

        AnnIndex::new(8, HnswParams::default())
            .save(temp.path())
            .unwrap();

        for path in dump_paths(temp.path(), &previous.basename) {
            assert!(!path.exists());
        }
        let (loaded, manifest) = AnnIndex::load(temp.path()).unwrap();
        assert_eq!(manifest.point_count, 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_missing() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            AnnIndex::load(temp.path()),
            Err(IndexError::IndexNotFound(_))
        ));
    }

    #[test]
    fn test_remove_files() {
        let temp = TempDir::new().unwrap();
        let index = AnnIndex::new(8, HnswParams::default());
        index.insert(1, &unit(8, 0)).unwrap();
        index.save(temp.path()).unwrap();

        AnnIndex::remove_files(temp.path()).unwrap();
        assert!(AnnIndex::load(temp.path()).is_err());
    }
}
