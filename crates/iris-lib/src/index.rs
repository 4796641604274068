//! The frozen, queryable color index.
//!
//! A [`ColorIndex`] bundles the distinct-set table and the node map behind
//! one read-only handle. After the build completes (or after a load) nothing
//! in the index mutates, so any number of reader threads may query it
//! concurrently with no locking.

use crate::color_set::ColorSet;
use crate::color_table::ColorSetTable;
use crate::error::Result;
use crate::node_map::NodeMap;
use crate::serialization;
use std::path::{Path, PathBuf};

/// Frozen coloring of a k-mer graph: node → set id → encoded color set.
#[derive(Debug)]
pub struct ColorIndex {
    k: usize,
    num_colors: u64,
    table: ColorSetTable,
    node_map: NodeMap,
}

impl ColorIndex {
    /// Assemble an index from its frozen parts.
    pub(crate) fn new(k: usize, num_colors: u64, table: ColorSetTable, node_map: NodeMap) -> Self {
        Self {
            k,
            num_colors,
            table,
            node_map,
        }
    }

    /// K-mer length the index was built with.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of colors (input sequences) in the build.
    #[inline]
    pub fn num_colors(&self) -> u64 {
        self.num_colors
    }

    /// Number of distinct color sets stored.
    #[inline]
    pub fn num_distinct_sets(&self) -> u64 {
        self.table.count()
    }

    /// Number of addressable graph nodes.
    #[inline]
    pub fn node_count(&self) -> u64 {
        self.node_map.node_count()
    }

    /// Total encoded size of all stored color sets, in bytes.
    pub fn encoded_set_bytes(&self) -> usize {
        self.table.encoded_bytes()
    }

    /// Color set for a node, or `None` for nodes never observed with a color.
    ///
    /// # Errors
    /// [`crate::IndexError::UnknownSetId`] when the node map references a set
    /// the table does not hold; index corruption, not a runtime condition.
    #[inline]
    pub fn color_set(&self, node: u64) -> Result<Option<&ColorSet>> {
        match self.node_map.get(node) {
            Some(id) => self.table.resolve(id).map(Some),
            None => Ok(None),
        }
    }

    /// Persist the index. Returns the final index file path.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        serialization::save_index(self, path)
    }

    /// Load a persisted index for querying.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        serialization::load_index(path)
    }

    pub(crate) fn table(&self) -> &ColorSetTable {
        &self.table
    }

    pub(crate) fn node_map(&self) -> &NodeMap {
        &self.node_map
    }
}
