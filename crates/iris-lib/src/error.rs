//! Error taxonomy for index construction and queries.
//!
//! Every I/O or corruption failure carries the pipeline stage that raised it,
//! so callers can tell data corruption apart from transient disk trouble
//! without parsing message strings. The phase (build vs. query) is known to
//! the caller from the operation it invoked; binaries add it as context.

use std::fmt;
use thiserror::Error;

/// Pipeline stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Color-set codec (encode/decode)
    Codec,
    /// External-memory sort (spill/merge)
    Sort,
    /// Distinct color-set table
    Table,
    /// Node → set-id map
    Map,
    /// Pseudoalignment engine
    Engine,
    /// Whole-index persistence (headers, file create/rename)
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Codec => "color set codec",
            Stage::Sort => "external sort",
            Stage::Table => "color set table",
            Stage::Map => "node map",
            Stage::Engine => "alignment engine",
            Stage::Persist => "index file",
        };
        f.write_str(name)
    }
}

/// Errors raised while building, persisting, loading, or querying an index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed caller input: an unsorted or duplicated color sequence, an
    /// out-of-range parameter, mismatched input lengths.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persisted bytes failed to decode into a valid structure. Decoding is
    /// atomic: no partially-decoded value is ever observable.
    #[error("corrupt data in {stage}: {reason}")]
    CorruptData {
        /// Stage whose bytes failed to decode
        stage: Stage,
        /// What was wrong with them
        reason: String,
    },

    /// A set id outside the table's assigned range. Indicates index
    /// corruption or a version mismatch, not a normal runtime condition.
    #[error("unknown color set id {id} (table holds {count} sets)")]
    UnknownSetId {
        /// The offending id
        id: u64,
        /// Number of set ids actually assigned
        count: u64,
    },

    /// Disk read/write failure. Fatal to the current build; temporary sort
    /// artifacts are reclaimed before this propagates.
    #[error("I/O failure in {stage}: {source}")]
    Io {
        /// Stage performing the I/O
        stage: Stage,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A build-time k-mer the graph was expected to resolve but did not.
    /// Surfaced rather than skipped: silently dropping the observation would
    /// corrupt the color sets of every other node of the sequence.
    #[error("k-mer at offset {position} of input sequence {sequence} not found in graph")]
    UnresolvedKmer {
        /// Rank of the input sequence (0-based)
        sequence: u64,
        /// K-mer start offset within the sequence
        position: usize,
    },
}

impl IndexError {
    /// Wrap an I/O error with the stage it occurred in.
    pub fn io(stage: Stage, source: std::io::Error) -> Self {
        IndexError::Io { stage, source }
    }

    /// Shorthand for a corruption error.
    pub fn corrupt(stage: Stage, reason: impl Into<String>) -> Self {
        IndexError::CorruptData {
            stage,
            reason: reason.into(),
        }
    }

    /// Classify a failed read: running off the end of the stream means the
    /// persisted bytes are truncated (corruption), anything else is real I/O.
    pub(crate) fn read_failure(stage: Stage, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            IndexError::corrupt(stage, "unexpected end of data")
        } else {
            IndexError::io(stage, source)
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
