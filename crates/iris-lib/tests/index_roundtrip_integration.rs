//! Integration tests for the full build → align → persist → reload cycle.

use iris_lib::{
    serialization, AlignMode, BuildConfiguration, ColorIndex, ColorIndexBuilder, KmerGraph,
    MapGraph, PseudoAligner,
};
use tempfile::TempDir;

const K: usize = 5;

fn fixture_sequences() -> (Vec<&'static [u8]>, Vec<u64>) {
    let sequences: Vec<&[u8]> = vec![
        b"ACGTACGTACGTACGT",   // color 0
        b"ACGTACGTACGTACGT",   // color 1, duplicate of color 0
        b"TTTTTACGTACGTTTTT",  // color 2, shares a core with 0/1
        b"GGGGGGGGGGGG",       // color 3, private homopolymer
    ];
    let colors = vec![0u64, 1, 2, 3];
    (sequences, colors)
}

fn build_config(tmp: &TempDir) -> BuildConfiguration {
    BuildConfiguration {
        tmp_dirname: tmp.path().join("sort_tmp"),
        verbose: false,
        ..BuildConfiguration::default()
    }
}

fn build_fixture(tmp: &TempDir) -> (ColorIndex, MapGraph) {
    let (sequences, colors) = fixture_sequences();
    let graph = MapGraph::from_sequences(&sequences, K).unwrap();
    let index = ColorIndexBuilder::new(build_config(tmp))
        .unwrap()
        .build(&sequences, &colors, &graph)
        .unwrap();
    (index, graph)
}

#[test]
fn test_build_covers_every_observed_node() {
    let tmp = TempDir::new().unwrap();
    let (index, graph) = build_fixture(&tmp);

    assert_eq!(index.node_count(), graph.node_count());
    // Every node came from at least one input sequence, so none may sit at
    // the unset sentinel.
    for node in 0..graph.node_count() {
        let set = index.color_set(node).unwrap();
        assert!(set.is_some(), "node {} has no color set", node);
        assert!(!set.unwrap().is_empty());
    }
}

#[test]
fn test_shared_kmers_share_one_set() {
    let tmp = TempDir::new().unwrap();
    let (index, graph) = build_fixture(&tmp);

    // Identical input sequences: their k-mers carry {0, 1} at minimum, and
    // two nodes with identical membership resolve to equal value sets.
    let node = graph.lookup_node(b"ACGTA").unwrap();
    let values = index.color_set(node).unwrap().unwrap().values();
    assert_eq!(values, vec![0, 1, 2]); // "ACGTA" also occurs in sequence 2

    // Far more nodes than distinct sets.
    assert!(index.num_distinct_sets() < index.node_count());
}

#[test]
fn test_alignments_survive_reload() {
    let tmp = TempDir::new().unwrap();
    let (index, graph) = build_fixture(&tmp);

    let reads: Vec<&[u8]> = vec![
        b"ACGTACGTACGT",
        b"TTTTTACGTA",
        b"GGGGGGGG",
        b"ACGTACGTTGCATGCA", // novel tail: its k-mers are absent from the graph
        b"NNNNNNNN",
    ];
    let modes = [
        AlignMode::Exact,
        AlignMode::Threshold(0.4),
        AlignMode::Threshold(0.75),
        AlignMode::Threshold(1.0),
    ];

    let aligner = PseudoAligner::new(&index, &graph).unwrap();
    let before: Vec<_> = modes
        .iter()
        .map(|&mode| aligner.align_batch(&reads, mode).unwrap())
        .collect();

    let base = tmp.path().join("fixture");
    let index_path = index.save(&base).unwrap();
    serialization::save_graph(&graph, &base).unwrap();

    let reloaded_index = ColorIndex::load(&index_path).unwrap();
    let reloaded_graph = serialization::load_graph(&base).unwrap();
    let reloaded_aligner = PseudoAligner::new(&reloaded_index, &reloaded_graph).unwrap();

    let after: Vec<_> = modes
        .iter()
        .map(|&mode| reloaded_aligner.align_batch(&reads, mode).unwrap())
        .collect();

    assert_eq!(before, after);
}

#[test]
fn test_reload_preserves_table_and_map() {
    let tmp = TempDir::new().unwrap();
    let (index, _) = build_fixture(&tmp);

    let base = tmp.path().join("fixture");
    index.save(&base).unwrap();
    let reloaded = ColorIndex::load(&base).unwrap();

    assert_eq!(reloaded.k(), index.k());
    assert_eq!(reloaded.num_colors(), index.num_colors());
    assert_eq!(reloaded.num_distinct_sets(), index.num_distinct_sets());
    assert_eq!(reloaded.node_count(), index.node_count());
    for node in 0..index.node_count() {
        let original = index.color_set(node).unwrap().map(|s| s.values());
        let loaded = reloaded.color_set(node).unwrap().map(|s| s.values());
        assert_eq!(original, loaded, "node {}", node);
    }
}

#[test]
fn test_exact_alignment_against_known_colors() {
    let tmp = TempDir::new().unwrap();
    let (index, graph) = build_fixture(&tmp);
    let aligner = PseudoAligner::new(&index, &graph).unwrap();

    // Private homopolymer read.
    let alignment = aligner.align(b"GGGGGGGGGGGG", AlignMode::Exact).unwrap();
    assert_eq!(alignment.colors, vec![3]);

    // Shared core: every k-mer of this read occurs in sequences 0, 1 and 2.
    let alignment = aligner.align(b"ACGTACGT", AlignMode::Exact).unwrap();
    assert_eq!(alignment.colors, vec![0, 1, 2]);

    // Unalignable read.
    let alignment = aligner.align(b"NNNNNNNNNN", AlignMode::Exact).unwrap();
    assert!(alignment.colors.is_empty());
    assert_eq!(alignment.found_kmers, 0);
}

#[test]
fn test_missing_index_file_is_io_error() {
    let tmp = TempDir::new().unwrap();
    let err = ColorIndex::load(tmp.path().join("nonexistent")).unwrap_err();
    assert!(matches!(err, iris_lib::IndexError::Io { .. }));
}

#[test]
fn test_corrupt_index_file_rejected() {
    let tmp = TempDir::new().unwrap();
    let (index, _) = build_fixture(&tmp);

    let base = tmp.path().join("fixture");
    let path = index.save(&base).unwrap();

    // Flip a magic byte.
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(
        ColorIndex::load(&path),
        Err(iris_lib::IndexError::CorruptData { .. })
    ));
}

#[test]
fn test_build_leaves_no_temp_files() {
    let tmp = TempDir::new().unwrap();
    let (_index, _graph) = build_fixture(&tmp);

    let sort_tmp = tmp.path().join("sort_tmp");
    let leftovers: Vec<_> = std::fs::read_dir(&sort_tmp)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind: {:?}", leftovers);
}
