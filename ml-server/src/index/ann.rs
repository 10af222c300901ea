//! A usearch HNSW index with external string IDs.

use ndarray::ArrayView2;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::config::IndexConfig;
use crate::error::{Error, Result};

/// Flat (unquantized) HNSW index under squared L2 distance.
///
/// usearch keys are positions in `ids`, so IDs need not be unique.
pub struct AnnIndex {
    index: Index,
    ids: Vec<String>,
}

impl AnnIndex {
    pub fn new(dimension: usize, config: &IndexConfig) -> Result<Self> {
        let options = IndexOptions {
            dimensions: dimension,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: config.m,
            expansion_add: config.ef_construction,
            expansion_search: config.ef_search,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| index_error("create index", e))?;

        Ok(Self {
            index,
            ids: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.index.dimensions()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Insert one vector per row of `embeddings`, paired with `ids`.
    pub fn extend(&mut self, ids: Vec<String>, embeddings: ArrayView2<'_, f32>) -> Result<()> {
        let needed = self.ids.len() + ids.len();
        if self.index.capacity() < needed {
            let capacity = needed.max(self.index.capacity() * 2);
            self.index
                .reserve(capacity)
                .map_err(|e| index_error("reserve", e))?;
        }

        for (id, row) in ids.into_iter().zip(embeddings.rows()) {
            let key = self.ids.len() as u64;
            let vector = row.to_vec();
            self.index
                .add(key, vector.as_slice())
                .map_err(|e| index_error("add vector", e))?;
            self.ids.push(id);
        }
        Ok(())
    }

    /// Up to `k` IDs nearest to `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<String>> {
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let matches = self
            .index
            .search(query, k)
            .map_err(|e| index_error("search", e))?;
        Ok(matches
            .keys
            .iter()
            .filter_map(|&key| self.ids.get(key as usize).cloned())
            .collect())
    }
}

fn index_error(action: &str, e: impl std::fmt::Display) -> Error {
    Error::Internal(format!("Failed to {}: {}", action, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn one_hot(dim: usize, hot: &[usize]) -> Array2<f32> {
        let mut array = Array2::zeros((hot.len(), dim));
        for (row, &col) in hot.iter().enumerate() {
            array[[row, col]] = 1.0;
        }
        array
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("id-{}", i)).collect()
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = AnnIndex::new(10, &IndexConfig::default()).unwrap();

        assert_eq!(index.dimension(), 10);
        assert!(index.search(&[0.0; 10], 5).unwrap().is_empty());
    }

    #[test]
    fn test_every_vector_finds_itself() {
        let dim = 64;
        let mut index = AnnIndex::new(dim, &IndexConfig::default()).unwrap();
        let hot: Vec<usize> = (0..dim).collect();
        index.extend(ids(dim), one_hot(dim, &hot).view()).unwrap();

        for i in 0..dim {
            let query = one_hot(dim, &[i]);
            let results = index.search(query.row(0).as_slice().unwrap(), 1).unwrap();
            assert_eq!(results, vec![format!("id-{}", i)]);
        }
    }

    #[test]
    fn test_results_ordered_closest_first() {
        let mut index = AnnIndex::new(10, &IndexConfig::default()).unwrap();
        let mut rows = Array2::zeros((50, 10));
        for i in 0..50 {
            rows[[i, 0]] = i as f32;
        }
        index.extend(ids(50), rows.view()).unwrap();

        let mut query = vec![0.0; 10];
        query[0] = 20.2;
        let results = index.search(&query, 3).unwrap();

        assert_eq!(results, vec!["id-20", "id-21", "id-19"]);
    }

    #[test]
    fn test_huge_k_is_clamped_to_size() {
        let mut index = AnnIndex::new(10, &IndexConfig::default()).unwrap();
        index.extend(ids(3), one_hot(10, &[0, 1, 2]).view()).unwrap();

        let results = index.search(&[0.0; 10], usize::MAX).unwrap();

        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_duplicate_ids_are_separate_entries() {
        let mut index = AnnIndex::new(10, &IndexConfig::default()).unwrap();
        let dup = vec!["same".to_string(), "same".to_string()];
        index.extend(dup, one_hot(10, &[0, 1]).view()).unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.search(&[0.0; 10], 2).unwrap(), vec!["same", "same"]);
    }

    #[test]
    fn test_extend_grows_capacity() {
        let mut index = AnnIndex::new(10, &IndexConfig::default()).unwrap();
        for i in 0..20 {
            index
                .extend(vec![format!("id-{}", i)], one_hot(10, &[i % 10]).view())
                .unwrap();
        }

        assert_eq!(index.len(), 20);
    }
}
