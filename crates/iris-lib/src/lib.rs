// iris: compressed coloring of a succinct k-mer graph
//
// Associates every graph node with the set of input sequences containing
// that node's k-mer, stores distinct color sets exactly once in
// delta-compressed form, and pseudoaligns reads against the frozen index.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod align;
pub mod builder;
pub mod color_set;
pub mod color_table;
pub mod constants;
pub mod error;
pub mod graph;
pub mod index;
pub mod node_map;
pub mod serialization;

// Re-export common types at crate root
pub use align::{AlignMode, Alignment, PseudoAligner};
pub use builder::{BuildConfiguration, ColorIndexBuilder};
pub use color_set::ColorSet;
pub use color_table::ColorSetTable;
pub use error::{IndexError, Result, Stage};
pub use graph::{KmerGraph, MapGraph};
pub use index::ColorIndex;

/// Version information
pub fn version() -> (u8, u8, u8) {
    constants::VERSION
}
