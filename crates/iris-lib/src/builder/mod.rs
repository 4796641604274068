//! Build pipeline for the color index:
//! 1. Scan colored sequences, resolving k-mers through the graph oracle
//! 2. Spill (node, color) observations into RAM-bounded sorted runs
//! 3. K-way merge the runs into one globally sorted stream
//! 4. Group per-node color sets, dedup, intern, fill the node map
//! 5. Freeze into the queryable index

pub mod color_builder;
pub mod config;
pub mod external_sort;

pub use color_builder::ColorIndexBuilder;
pub use config::BuildConfiguration;
pub use external_sort::{Observation, ObservationSorter};
