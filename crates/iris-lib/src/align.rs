//! Pseudoalignment of reads against a frozen color index.
//!
//! A read is decomposed into its overlapping k-mers; each k-mer found in the
//! graph contributes its node's color set, and the per-k-mer sets are
//! combined into the read's color set. K-mers absent from the graph are
//! skipped entirely: they contribute no information, not a veto. A read with
//! zero found k-mers aligns to the empty set: "unaligned" is a valid
//! outcome, never an error.
//!
//! This is the query-time hot path. The engine holds only shared references
//! to the immutable index and graph, so arbitrarily many threads may align
//! concurrently with no locking.

use crate::color_set::ColorSet;
use crate::error::{IndexError, Result};
use crate::graph::KmerGraph;
use crate::index::ColorIndex;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// How per-k-mer color sets combine into a read's color set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignMode {
    /// A color must appear in every found k-mer's set.
    Exact,
    /// A color must appear in at least `⌈t · n_found⌉` of the found k-mers'
    /// sets, for `t` in `(0, 1]`. Tolerates sequencing errors or structural
    /// variation breaking a minority of k-mers. `Threshold(1.0)` is
    /// equivalent to [`AlignMode::Exact`].
    Threshold(f64),
}

impl AlignMode {
    /// Reject threshold fractions outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if let AlignMode::Threshold(t) = *self {
            if !(t > 0.0 && t <= 1.0) {
                return Err(IndexError::InvalidInput(format!(
                    "threshold fraction must be in (0, 1], got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// One read's pseudoalignment outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Alignment {
    /// Colors consistent with the read, sorted ascending. Empty means
    /// "unaligned".
    pub colors: Vec<u64>,
    /// Number of the read's k-mers that were found in the graph.
    pub found_kmers: u64,
}

/// Read-only pseudoalignment engine over a frozen index and its graph.
pub struct PseudoAligner<'a, G> {
    index: &'a ColorIndex,
    graph: &'a G,
}

impl<'a, G: KmerGraph + Sync> PseudoAligner<'a, G> {
    /// Pair an index with the graph it was built against.
    ///
    /// # Errors
    /// [`IndexError::InvalidInput`] when the graph's k-mer length does not
    /// match the index (a version-mismatch guard).
    pub fn new(index: &'a ColorIndex, graph: &'a G) -> Result<Self> {
        if index.k() != graph.k() {
            return Err(IndexError::InvalidInput(format!(
                "index built with k={} but graph has k={}",
                index.k(),
                graph.k()
            )));
        }
        Ok(Self { index, graph })
    }

    /// Pseudoalign one read.
    ///
    /// # Errors
    /// Only on index corruption ([`IndexError::UnknownSetId`]) or an invalid
    /// threshold fraction; lookup misses are normal and never error.
    pub fn align(&self, read: &[u8], mode: AlignMode) -> Result<Alignment> {
        mode.validate()?;
        match mode {
            AlignMode::Exact => self.align_exact(read),
            AlignMode::Threshold(t) => self.align_threshold(read, t),
        }
    }

    /// Exact mode: intersection of all found k-mers' color sets.
    fn align_exact(&self, read: &[u8]) -> Result<Alignment> {
        let k = self.index.k();
        let mut found = 0u64;
        let mut colors: Option<Vec<u64>> = None;

        if read.len() >= k {
            for window in read.windows(k) {
                let Some(node) = self.graph.lookup_node(window) else {
                    continue;
                };
                found += 1;

                // Once the running intersection is empty it stays empty;
                // keep scanning only to finish the found-k-mer count.
                if matches!(&colors, Some(c) if c.is_empty()) {
                    continue;
                }

                let set = self.index.color_set(node)?;
                colors = Some(match (colors, set) {
                    (None, Some(set)) => set.values(),
                    (None, None) => Vec::new(),
                    (Some(acc), Some(set)) => intersect_sorted(&acc, set),
                    (Some(_), None) => Vec::new(),
                });
            }
        }

        Ok(Alignment {
            colors: colors.unwrap_or_default(),
            found_kmers: found,
        })
    }

    /// Threshold mode: colors appearing in at least `⌈t · n_found⌉` of the
    /// found k-mers' sets.
    fn align_threshold(&self, read: &[u8], t: f64) -> Result<Alignment> {
        let k = self.index.k();
        let mut counts = vec![0u64; self.index.num_colors() as usize];
        let mut found = 0u64;

        if read.len() >= k {
            for window in read.windows(k) {
                let Some(node) = self.graph.lookup_node(window) else {
                    continue;
                };
                found += 1;
                if let Some(set) = self.index.color_set(node)? {
                    for color in set.iter() {
                        counts[color as usize] += 1;
                    }
                }
            }
        }

        if found == 0 {
            return Ok(Alignment::default());
        }

        let needed = ((t * found as f64).ceil() as u64).max(1);
        let colors = counts
            .iter()
            .enumerate()
            .filter(|&(_, &count)| count >= needed)
            .map(|(color, _)| color as u64)
            .collect();

        Ok(Alignment {
            colors,
            found_kmers: found,
        })
    }

    /// Pseudoalign a batch of reads in parallel.
    ///
    /// Each read's alignment is independent; no shared mutable state is
    /// touched.
    pub fn align_batch<S>(&self, reads: &[S], mode: AlignMode) -> Result<Vec<Alignment>>
    where
        S: AsRef<[u8]> + Sync,
    {
        mode.validate()?;
        reads
            .par_iter()
            .map(|read| self.align(read.as_ref(), mode))
            .collect()
    }

    /// Batch alignment with early termination.
    ///
    /// The cancellation flag is checked between reads, never mid-scan; reads
    /// skipped after cancellation yield `None`.
    pub fn align_batch_until<S>(
        &self,
        reads: &[S],
        mode: AlignMode,
        cancel: &AtomicBool,
    ) -> Result<Vec<Option<Alignment>>>
    where
        S: AsRef<[u8]> + Sync,
    {
        mode.validate()?;
        reads
            .par_iter()
            .map(|read| {
                if cancel.load(Ordering::Relaxed) {
                    return Ok(None);
                }
                self.align(read.as_ref(), mode).map(Some)
            })
            .collect()
    }

    /// Number of reads aligning to each color across a batch.
    ///
    /// Accumulates per-thread count vectors merged at the end, so parallel
    /// aggregation never loses updates.
    pub fn color_hit_counts<S>(&self, reads: &[S], mode: AlignMode) -> Result<Vec<u64>>
    where
        S: AsRef<[u8]> + Sync,
    {
        mode.validate()?;
        let num_colors = self.index.num_colors() as usize;
        reads
            .par_iter()
            .try_fold(
                || vec![0u64; num_colors],
                |mut acc, read| {
                    for color in self.align(read.as_ref(), mode)?.colors {
                        acc[color as usize] += 1;
                    }
                    Ok(acc)
                },
            )
            .try_reduce(
                || vec![0u64; num_colors],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    Ok(a)
                },
            )
    }
}

/// Intersect a sorted accumulator with a set's sorted decode stream.
fn intersect_sorted(acc: &[u64], set: &ColorSet) -> Vec<u64> {
    let mut out = Vec::with_capacity(acc.len().min(set.len() as usize));
    let mut stream = set.iter().peekable();

    'acc: for &c in acc {
        loop {
            match stream.peek() {
                Some(&v) if v < c => {
                    stream.next();
                }
                Some(&v) if v == c => {
                    out.push(c);
                    stream.next();
                    continue 'acc;
                }
                Some(_) => continue 'acc,
                None => break 'acc,
            }
        }
    }
    out
}
