use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use iris_lib::{
    serialization, AlignMode, BuildConfiguration, ColorIndex, ColorIndexBuilder, KmerGraph,
    MapGraph, PseudoAligner,
};
use needletail::parse_fastx_file;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "iris")]
#[command(version = "0.1.0")]
#[command(about = "iris: compressed coloring of k-mer graphs with pseudoalignment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a color index from input sequences
    Build {
        /// Input FASTA/FASTQ file (optionally gzipped)
        #[arg(short, long)]
        input: PathBuf,

        /// K-mer length (at most 31)
        #[arg(short, long)]
        k: usize,

        /// Output index base path
        #[arg(short, long)]
        output: PathBuf,

        /// Color file: one integer per input sequence. Defaults to
        /// sequential colors in input order.
        #[arg(short, long)]
        color_file: Option<PathBuf>,

        /// Number of threads (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// RAM limit in GiB for external sorting
        #[arg(short = 'r', long, default_value = "4")]
        ram_limit: usize,

        /// Directory for temporary spill files
        #[arg(long, default_value = "iris_tmp")]
        tmp_dir: PathBuf,
    },

    /// Pseudoalign reads against a color index
    Align {
        /// Index base path (as passed to build)
        #[arg(short, long)]
        index: PathBuf,

        /// Reads to align (FASTA/FASTQ, optionally gzipped)
        #[arg(short, long)]
        query: PathBuf,

        /// Threshold fraction in (0, 1]; omit for exact intersection
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Output TSV path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print statistics for a color index
    Stats {
        /// Index base path
        #[arg(short, long)]
        index: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            k,
            output,
            color_file,
            threads,
            ram_limit,
            tmp_dir,
        } => build_command(input, k, output, color_file, threads, ram_limit, tmp_dir)?,
        Commands::Align {
            index,
            query,
            threshold,
            output,
        } => align_command(index, query, threshold, output)?,
        Commands::Stats { index } => stats_command(index)?,
    }

    Ok(())
}

/// Read every sequence record from a FASTA/FASTQ file.
fn read_sequences(path: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = parse_fastx_file(path)
        .with_context(|| format!("failed to open sequence file: {}", path.display()))?;

    let mut sequences = Vec::new();
    while let Some(record) = reader.next() {
        let record = record
            .with_context(|| format!("failed to parse sequence record in {}", path.display()))?;
        sequences.push(record.seq().into_owned());
    }
    Ok(sequences)
}

/// Parse a color file: one integer per line, in input-sequence order.
/// Strict parsing: anything but a bare non-negative integer per line is
/// an error.
fn parse_color_file(path: &Path) -> Result<Vec<u64>> {
    let file =
        File::open(path).with_context(|| format!("failed to open color file: {}", path.display()))?;
    let mut colors = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read color file: {}", path.display()))?;
        let trimmed = line.trim();
        let color: u64 = trimmed.parse().with_context(|| {
            format!(
                "color file {}, line {}: could not parse integer: {:?}",
                path.display(),
                line_no + 1,
                trimmed
            )
        })?;
        colors.push(color);
    }
    Ok(colors)
}

#[allow(clippy::too_many_arguments)]
fn build_command(
    input: PathBuf,
    k: usize,
    output: PathBuf,
    color_file: Option<PathBuf>,
    threads: usize,
    ram_limit: usize,
    tmp_dir: PathBuf,
) -> Result<()> {
    let sequences = read_sequences(&input).context("building index: reading input")?;
    info!("Read {} sequences from {}", sequences.len(), input.display());

    let colors = match color_file {
        Some(path) => {
            let colors = parse_color_file(&path).context("building index: reading colors")?;
            if colors.len() != sequences.len() {
                bail!(
                    "color file has {} entries but input has {} sequences",
                    colors.len(),
                    sequences.len()
                );
            }
            colors
        }
        None => (0..sequences.len() as u64).collect(),
    };

    let graph = MapGraph::from_sequences(&sequences, k).context("building index: graph")?;
    info!("Indexed {} distinct k-mers (k = {})", graph.node_count(), k);

    let config = BuildConfiguration {
        num_threads: threads,
        ram_limit_gib: ram_limit,
        tmp_dirname: tmp_dir,
        verbose: true,
    };
    let index = ColorIndexBuilder::new(config)
        .context("building index: configuration")?
        .build(&sequences, &colors, &graph)
        .context("building index")?;

    let index_path = index.save(&output).context("building index: persisting")?;
    let graph_path =
        serialization::save_graph(&graph, &output).context("building index: persisting graph")?;
    info!("Wrote {} and {}", index_path.display(), graph_path.display());

    Ok(())
}

fn align_command(
    index: PathBuf,
    query: PathBuf,
    threshold: Option<f64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let color_index = ColorIndex::load(&index).context("loading index")?;
    let graph = serialization::load_graph(&index).context("loading index: graph")?;
    info!(
        "Loaded index: {} nodes, {} colors, {} distinct sets",
        color_index.node_count(),
        color_index.num_colors(),
        color_index.num_distinct_sets()
    );

    let mode = match threshold {
        Some(t) => AlignMode::Threshold(t),
        None => AlignMode::Exact,
    };
    let aligner = PseudoAligner::new(&color_index, &graph).context("aligning reads")?;

    let reads = read_sequences(&query).context("aligning reads: reading queries")?;
    info!("Aligning {} reads", reads.len());
    let alignments = aligner.align_batch(&reads, mode).context("aligning reads")?;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(&path).with_context(|| {
            format!("failed to create output file: {}", path.display())
        })?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };

    // One line per read: rank, found k-mer count, then the colors.
    for (rank, alignment) in alignments.iter().enumerate() {
        write!(writer, "{}\t{}", rank, alignment.found_kmers)?;
        for color in &alignment.colors {
            write!(writer, "\t{}", color)?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;

    Ok(())
}

fn stats_command(index: PathBuf) -> Result<()> {
    let color_index = ColorIndex::load(&index).context("loading index")?;

    println!("nodes:          {}", color_index.node_count());
    println!("colors:         {}", color_index.num_colors());
    println!("distinct sets:  {}", color_index.num_distinct_sets());
    println!("set bytes:      {}", color_index.encoded_set_bytes());
    println!("k:              {}", color_index.k());

    Ok(())
}
