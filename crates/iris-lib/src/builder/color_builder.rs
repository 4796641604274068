//! Color index build orchestration.
//!
//! The pipeline, per the build phase of the index lifecycle:
//! 1. Scan every (sequence, color) pair, resolving each k-mer to a node id
//!    through the graph oracle and emitting (node, color) observations into
//!    RAM-bounded sorted runs.
//! 2. K-way merge the runs into one stream sorted by (node, color).
//! 3. One linear pass over the merged stream: each maximal same-node run
//!    becomes a deduplicated color set, interned into the distinct-set
//!    table, with the node map recording node → set id.
//!
//! The build is all-or-nothing: any error propagates before anything is
//! persisted, and the sorter reclaims its temp files on every exit path.

use crate::builder::config::BuildConfiguration;
use crate::builder::external_sort::{Observation, ObservationSorter};
use crate::color_table::ColorSetTable;
use crate::constants::INVALID_U64;
use crate::error::{IndexError, Result, Stage};
use crate::graph::KmerGraph;
use crate::index::ColorIndex;
use crate::node_map::NodeMapBuilder;
use rayon::prelude::*;
use tracing::info;

/// Builder for constructing color indexes.
pub struct ColorIndexBuilder {
    config: BuildConfiguration,
}

impl ColorIndexBuilder {
    /// Create a builder with the given configuration.
    pub fn new(config: BuildConfiguration) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build a color index from colored input sequences.
    ///
    /// `sequences[i]` carries color `colors[i]`; colors are arbitrary dense
    /// ids below 2^32. Every k-mer of every sequence must resolve in
    /// `graph`, since the graph is expected to have been built from the same
    /// input; a lookup miss is an [`IndexError::UnresolvedKmer`].
    ///
    /// # Parallelism
    /// `config.num_threads` controls the rayon pool: `0` uses all available
    /// cores. The RAM budget is partitioned across producer threads.
    pub fn build<G, S>(&self, sequences: &[S], colors: &[u64], graph: &G) -> Result<ColorIndex>
    where
        G: KmerGraph + Sync,
        S: AsRef<[u8]> + Sync,
    {
        if sequences.len() != colors.len() {
            return Err(IndexError::InvalidInput(format!(
                "{} sequences but {} colors",
                sequences.len(),
                colors.len()
            )));
        }
        if let Some(&max_color) = colors.iter().max() {
            if max_color >= u32::MAX as u64 {
                return Err(IndexError::InvalidInput(format!(
                    "color {} does not fit the 32-bit observation record",
                    max_color
                )));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| IndexError::InvalidInput(format!("failed to create thread pool: {e}")))?;

        pool.install(|| self.build_inner(sequences, colors, graph))
    }

    /// Inner build logic, runs inside the rayon thread pool.
    fn build_inner<G, S>(&self, sequences: &[S], colors: &[u64], graph: &G) -> Result<ColorIndex>
    where
        G: KmerGraph + Sync,
        S: AsRef<[u8]> + Sync,
    {
        self.config.print();
        info!("Building color index");

        let node_count = graph.node_count();
        let num_threads = rayon::current_num_threads().max(1);
        let sorter = ObservationSorter::new(
            &self.config.tmp_dirname,
            self.config.ram_limit_gib,
            num_threads,
        )
        .map_err(|e| IndexError::io(Stage::Sort, e))?;

        info!("Step 1: Scanning {} sequences into sorted runs...", sequences.len());
        self.generate_runs(sequences, colors, graph, &sorter)?;

        info!("Step 2: Merging {} runs...", sorter.num_files());
        let stats = sorter.merge().map_err(|e| IndexError::io(Stage::Sort, e))?;
        info!(
            "  {} observations over {} distinct nodes",
            stats.num_observations, stats.num_nodes
        );

        info!("Step 3: Grouping per-node color sets...");
        let merged = sorter.merged().map_err(|e| IndexError::io(Stage::Sort, e))?;
        let mut table = ColorSetTable::new();
        let mut map_builder = NodeMapBuilder::new(node_count);
        let grouped = group_observations(merged.iter(), &mut table, &mut map_builder)?;
        info!(
            "  {} nodes grouped into {} distinct color sets",
            grouped,
            table.count()
        );

        let num_sets = table.count();
        let node_map = map_builder.freeze(num_sets);
        let num_colors = colors.iter().map(|&c| c + 1).max().unwrap_or(0);

        info!("Color index build complete");
        Ok(ColorIndex::new(graph.k(), num_colors, table, node_map))
    }

    /// Run generation: parallel producers over disjoint chunks of the input,
    /// each with its own RAM-bounded buffer flushed through the shared
    /// sorter.
    fn generate_runs<G, S>(
        &self,
        sequences: &[S],
        colors: &[u64],
        graph: &G,
        sorter: &ObservationSorter,
    ) -> Result<()>
    where
        G: KmerGraph + Sync,
        S: AsRef<[u8]> + Sync,
    {
        let k = graph.k();
        let capacity = sorter.buffer_size_per_thread();
        let num_chunks = rayon::current_num_threads().max(1);
        let chunk_size = sequences.len().div_ceil(num_chunks).max(1);

        sequences
            .par_chunks(chunk_size)
            .zip(colors.par_chunks(chunk_size))
            .enumerate()
            .try_for_each(|(chunk_idx, (seq_chunk, color_chunk))| -> Result<()> {
                let mut buffer: Vec<Observation> = Vec::new();
                let base = chunk_idx * chunk_size;

                for (offset, (seq, &color)) in seq_chunk.iter().zip(color_chunk).enumerate() {
                    let seq = seq.as_ref();
                    let color = color as u32;
                    if seq.len() < k {
                        continue;
                    }
                    for (pos, window) in seq.windows(k).enumerate() {
                        match graph.lookup_node(window) {
                            Some(node) => buffer.push(Observation { node, color }),
                            None => {
                                return Err(IndexError::UnresolvedKmer {
                                    sequence: (base + offset) as u64,
                                    position: pos,
                                })
                            }
                        }
                        if buffer.len() >= capacity {
                            sorter
                                .sort_and_flush(&mut buffer)
                                .map_err(|e| IndexError::io(Stage::Sort, e))?;
                        }
                    }
                }
                if !buffer.is_empty() {
                    sorter
                        .sort_and_flush(&mut buffer)
                        .map_err(|e| IndexError::io(Stage::Sort, e))?;
                }
                Ok(())
            })
    }
}

/// Single linear pass over the node-sorted observation stream.
///
/// Each maximal same-node run becomes one color set: duplicate colors are
/// dropped (they are adjacent, since the stream is sorted by (node, color)),
/// the set is interned, and the node map records the assignment. Returns the
/// number of nodes grouped.
pub(crate) fn group_observations<I>(
    observations: I,
    table: &mut ColorSetTable,
    map: &mut NodeMapBuilder,
) -> Result<u64>
where
    I: IntoIterator<Item = Observation>,
{
    let mut current_node = INVALID_U64;
    let mut pending: Vec<u64> = Vec::new();
    let mut grouped = 0u64;

    for obs in observations {
        let node = obs.node;
        let color = obs.color as u64;
        if node != current_node {
            if current_node != INVALID_U64 {
                let id = table.intern(&pending)?;
                map.set(current_node, id);
                grouped += 1;
            }
            current_node = node;
            pending.clear();
            pending.push(color);
        } else if pending.last() != Some(&color) {
            pending.push(color);
        }
    }
    if current_node != INVALID_U64 {
        let id = table.intern(&pending)?;
        map.set(current_node, id);
        grouped += 1;
    }

    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MapGraph;
    use tempfile::TempDir;

    fn obs(node: u64, color: u32) -> Observation {
        Observation { node, color }
    }

    #[test]
    fn test_group_observations_dedups_colors() {
        // Node 5 observed with colors {2, 2, 7, 1} across several records:
        // the stored set must be exactly {1, 2, 7}.
        let mut stream = vec![obs(5, 2), obs(5, 2), obs(5, 7), obs(5, 1), obs(3, 4)];
        stream.sort_unstable();

        let mut table = ColorSetTable::new();
        let mut map = NodeMapBuilder::new(6);
        let grouped = group_observations(stream, &mut table, &mut map).unwrap();

        assert_eq!(grouped, 2);
        let map = map.freeze(table.count());
        let set_id = map.get(5).unwrap();
        assert_eq!(table.resolve(set_id).unwrap().values(), vec![1, 2, 7]);
        assert_eq!(table.resolve(map.get(3).unwrap()).unwrap().values(), vec![4]);
    }

    #[test]
    fn test_group_observations_shares_identical_sets() {
        let mut stream = vec![obs(0, 1), obs(0, 2), obs(1, 1), obs(1, 2), obs(2, 9)];
        stream.sort_unstable();

        let mut table = ColorSetTable::new();
        let mut map = NodeMapBuilder::new(3);
        group_observations(stream, &mut table, &mut map).unwrap();

        assert_eq!(table.count(), 2);
        let map = map.freeze(table.count());
        assert_eq!(map.get(0), map.get(1));
        assert_ne!(map.get(0), map.get(2));
    }

    #[test]
    fn test_group_observations_empty_stream() {
        let mut table = ColorSetTable::new();
        let mut map = NodeMapBuilder::new(4);
        let grouped = group_observations(std::iter::empty(), &mut table, &mut map).unwrap();
        assert_eq!(grouped, 0);
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_build_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let sequences: Vec<&[u8]> = vec![b"ACGTACGT", b"ACGTACGT", b"TTTTTTT"];
        let colors = vec![0u64, 1, 2];
        let graph = MapGraph::from_sequences(&sequences, 4).unwrap();

        let config = BuildConfiguration {
            tmp_dirname: tmp.path().to_path_buf(),
            verbose: false,
            ..BuildConfiguration::default()
        };
        let builder = ColorIndexBuilder::new(config).unwrap();
        let index = builder.build(&sequences, &colors, &graph).unwrap();

        assert_eq!(index.k(), 4);
        assert_eq!(index.num_colors(), 3);
        assert_eq!(index.node_count(), graph.node_count());

        // Every k-mer of the first two sequences is shared: one set {0, 1}.
        let node = graph.lookup_node(b"ACGT").unwrap();
        let set = index.color_set(node).unwrap().unwrap();
        assert_eq!(set.values(), vec![0, 1]);

        // The poly-T sequence is private to color 2.
        let node = graph.lookup_node(b"TTTT").unwrap();
        let set = index.color_set(node).unwrap().unwrap();
        assert_eq!(set.values(), vec![2]);
    }

    #[test]
    fn test_build_surfaces_unresolved_kmer() {
        let tmp = TempDir::new().unwrap();
        // Graph built from a different sequence than the one being indexed.
        let graph = MapGraph::from_sequences(&[b"AAAAAA".as_slice()], 4).unwrap();
        let sequences: Vec<&[u8]> = vec![b"CCCCCC"];

        let config = BuildConfiguration {
            tmp_dirname: tmp.path().to_path_buf(),
            verbose: false,
            ..BuildConfiguration::default()
        };
        let builder = ColorIndexBuilder::new(config).unwrap();
        let err = builder.build(&sequences, &[0], &graph).unwrap_err();
        assert!(matches!(err, IndexError::UnresolvedKmer { sequence: 0, .. }));
    }

    #[test]
    fn test_build_mismatched_inputs() {
        let graph = MapGraph::from_sequences(&[b"ACGT".as_slice()], 4).unwrap();
        let builder = ColorIndexBuilder::new(BuildConfiguration::default()).unwrap();
        let err = builder
            .build(&[b"ACGT".as_slice()], &[0, 1], &graph)
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }
}
