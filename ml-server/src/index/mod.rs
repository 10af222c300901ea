//! Named in-memory vector indices.

mod ann;

pub use ann::AnnIndex;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ndarray::ArrayView2;

use crate::config::IndexConfig;
use crate::error::{Error, Result};

type SharedIndex = Arc<RwLock<AnnIndex>>;

/// Registry of named ANN indices.
///
/// The name map and every index have their own lock. Building and
/// installing an index is serialized across all names by `build_lock`; a
/// finished index replaces the previous one with a single map write, so
/// searches and adds already holding the old index finish against it.
pub struct IndexRegistry {
    config: IndexConfig,
    indices: RwLock<HashMap<String, SharedIndex>>,
    build_lock: Mutex<()>,
}

impl IndexRegistry {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            config,
            indices: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    fn get(&self, name: &str) -> Option<SharedIndex> {
        let indices = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        indices.get(name).cloned()
    }

    /// The named index, if it exists with this dimensionality.
    fn get_with_dimension(&self, name: &str, dimension: usize) -> Option<SharedIndex> {
        self.get(name).filter(|index| {
            index.read().unwrap_or_else(PoisonError::into_inner).dimension() == dimension
        })
    }

    /// Dimensionality of the named index, if it exists.
    pub fn dimension(&self, name: &str) -> Option<usize> {
        self.get(name)
            .map(|index| index.read().unwrap_or_else(PoisonError::into_inner).dimension())
    }

    /// Number of entries in the named index, if it exists.
    pub fn len(&self, name: &str) -> Option<usize> {
        self.get(name)
            .map(|index| index.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    /// Build a new index from `ids` and `embeddings`, replacing any index of that name.
    pub fn create(&self, name: &str, ids: Vec<String>, embeddings: ArrayView2<'_, f32>) -> Result<()> {
        check_counts(&ids, embeddings)?;

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.build_and_install(name, ids, embeddings)
    }

    /// Append to the named index, creating it if missing or of another dimensionality.
    pub fn add(&self, name: &str, ids: Vec<String>, embeddings: ArrayView2<'_, f32>) -> Result<()> {
        check_counts(&ids, embeddings)?;
        let dimension = embeddings.ncols();

        if let Some(index) = self.get_with_dimension(name, dimension) {
            return append(name, &index, ids, embeddings);
        }

        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent add may have created it while we waited
        match self.get_with_dimension(name, dimension) {
            Some(index) => append(name, &index, ids, embeddings),
            None => self.build_and_install(name, ids, embeddings),
        }
    }

    /// Caller holds `build_lock`.
    fn build_and_install(&self, name: &str, ids: Vec<String>, embeddings: ArrayView2<'_, f32>) -> Result<()> {
        let mut index = AnnIndex::new(embeddings.ncols(), &self.config)?;
        index.extend(ids, embeddings)?;

        tracing::info!(
            "Built index '{}' with {} vectors of dimension {}",
            name,
            index.len(),
            index.dimension()
        );

        let mut indices = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        if indices.contains_key(name) {
            tracing::warn!("Index '{}' already exists. Overwriting.", name);
        }
        indices.insert(name.to_string(), Arc::new(RwLock::new(index)));
        Ok(())
    }

    /// Up to `k` nearest IDs for every query row, closest first.
    pub fn search(&self, name: &str, embeddings: ArrayView2<'_, f32>, k: i64) -> Result<Vec<Vec<String>>> {
        if k < 1 {
            return Err(Error::InvalidRequest(format!(
                "k must be a positive integer; got {}",
                k
            )));
        }

        let index = self
            .get(name)
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        let index = index.read().unwrap_or_else(PoisonError::into_inner);
        if index.dimension() != embeddings.ncols() {
            return Err(Error::IndexNotFound(name.to_string()));
        }

        // Never more than the index holds
        let k = usize::try_from(k).unwrap_or(usize::MAX).min(index.len());
        embeddings
            .rows()
            .into_iter()
            .map(|row| index.search(&row.to_vec(), k))
            .collect()
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new(IndexConfig::default())
    }
}

fn append(name: &str, index: &SharedIndex, ids: Vec<String>, embeddings: ArrayView2<'_, f32>) -> Result<()> {
    let mut index = index.write().unwrap_or_else(PoisonError::into_inner);
    index.extend(ids, embeddings)?;
    tracing::debug!(
        "Added {} vectors to index '{}' ({} total)",
        embeddings.nrows(),
        name,
        index.len()
    );
    Ok(())
}

fn check_counts(ids: &[String], embeddings: ArrayView2<'_, f32>) -> Result<()> {
    if ids.len() != embeddings.nrows() {
        return Err(Error::InvalidRequest(format!(
            "Number of embedding IDs must match number of embeddings; got {} IDs and {} embeddings",
            ids.len(),
            embeddings.nrows()
        )));
    }
    Ok(())
}
