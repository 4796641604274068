//! RAM-bounded external sorting of (node, color) observations.
//!
//! The builder emits far more observations than fit in memory, so sorting
//! runs in two phases:
//!
//! 1. Run generation: producer threads fill RAM-bounded buffers; each full
//!    buffer is sorted in parallel and flushed to a temporary binary run
//!    file.
//! 2. K-way merge: all run files are memory-mapped and merged into a single
//!    globally sorted file: a linear scan over run heads when there are few
//!    runs, a min-heap keyed by `(node, color)` otherwise.
//!
//! Buffer size per thread = `(ram_limit_gib * GiB) / (2 * record_size * num_threads)`;
//! the factor of 2 accounts for temporary memory during the parallel sort.
//!
//! Temporary files are process-scoped resources: they are deleted once fully
//! consumed, and `Drop` reclaims whatever is left on every exit path.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::Mmap;
use rayon::prelude::*;
use tracing::{debug, info};

/// Size of a packed [`Observation`] in bytes (no padding)
pub const OBSERVATION_SIZE_BYTES: usize = 12;

/// Bytes per GiB
pub const GIB: usize = 1024 * 1024 * 1024;

/// Linear scan is used for at most this many open runs; a min-heap above.
const SCAN_THRESHOLD: usize = 16;

/// One (node, color) observation, packed for disk I/O.
///
/// Layout: node id (8) + color (4) = 12 bytes. Ordered by `(node, color)`
/// so that the merged stream groups each node's colors contiguously.
#[repr(C, packed(4))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Graph node id the k-mer resolved to
    pub node: u64,
    /// Color of the input sequence the k-mer came from
    pub color: u32,
}

impl Observation {
    /// Read from bytes.
    ///
    /// # Safety
    /// `bytes` must point to at least [`OBSERVATION_SIZE_BYTES`] readable
    /// bytes holding a packed `Observation`.
    #[inline]
    pub unsafe fn from_bytes(bytes: *const u8) -> Self {
        // SAFETY: read_unaligned handles packed/unaligned access
        unsafe { std::ptr::read_unaligned(bytes as *const Self) }
    }

    /// Write to bytes.
    pub fn to_bytes(&self) -> [u8; OBSERVATION_SIZE_BYTES] {
        let mut buf = [0u8; OBSERVATION_SIZE_BYTES];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self as *const Self as *const u8,
                buf.as_mut_ptr(),
                OBSERVATION_SIZE_BYTES,
            );
        }
        buf
    }
}

impl PartialOrd for Observation {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Observation {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Copy fields to avoid taking references to packed struct fields
        let self_node = self.node;
        let other_node = other.node;
        let self_color = self.color;
        let other_color = other.color;

        match self_node.cmp(&other_node) {
            std::cmp::Ordering::Equal => self_color.cmp(&other_color),
            ord => ord,
        }
    }
}

/// External sorter for observations.
///
/// Manages RAM-bounded sorting with temp file spillover and k-way merge.
/// `sort_and_flush` is safe to call from multiple producer threads.
pub struct ObservationSorter {
    /// Temp directory for intermediate files
    tmp_dir: PathBuf,
    /// Run identifier (timestamp-based for uniqueness)
    run_id: u64,
    /// Atomic counter for temp file IDs
    num_files: AtomicU64,
    /// RAM limit in GiB, partitioned across producer threads
    ram_limit_gib: usize,
    /// Number of producer threads
    num_threads: usize,
}

impl ObservationSorter {
    /// Create a new external sorter, creating `tmp_dir` if needed.
    pub fn new(
        tmp_dir: impl AsRef<Path>,
        ram_limit_gib: usize,
        num_threads: usize,
    ) -> std::io::Result<Self> {
        let tmp_dir = tmp_dir.as_ref().to_path_buf();
        fs::create_dir_all(&tmp_dir)?;

        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;

        Ok(Self {
            tmp_dir,
            run_id,
            num_files: AtomicU64::new(0),
            ram_limit_gib,
            num_threads,
        })
    }

    /// Per-thread buffer size in records, from the partitioned RAM budget.
    pub fn buffer_size_per_thread(&self) -> usize {
        let total_bytes = self.ram_limit_gib * GIB;
        let bytes_per_thread = total_bytes / (2 * self.num_threads.max(1));
        (bytes_per_thread / OBSERVATION_SIZE_BYTES).max(1)
    }

    /// Path for a run file by ID.
    fn run_file_path(&self, id: u64) -> PathBuf {
        self.tmp_dir
            .join(format!("iris.tmp.run_{}.observations.{}.bin", self.run_id, id))
    }

    /// Path for the final merged file.
    fn merged_file_path(&self) -> PathBuf {
        self.tmp_dir
            .join(format!("iris.tmp.run_{}.observations.bin", self.run_id))
    }

    /// Sort a buffer and flush it to a new run file, clearing the buffer.
    ///
    /// Returns the run file ID. Thread-safe via the atomic counter.
    pub fn sort_and_flush(&self, buffer: &mut Vec<Observation>) -> std::io::Result<u64> {
        buffer.par_sort_unstable();

        let file_id = self.num_files.fetch_add(1, Ordering::SeqCst);
        let path = self.run_file_path(file_id);
        debug!("Flushing {} observations to {:?}", buffer.len(), path);

        let file = File::create(&path)?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);
        for obs in buffer.iter() {
            writer.write_all(&obs.to_bytes())?;
        }
        writer.flush()?;
        buffer.clear();

        Ok(file_id)
    }

    /// Number of run files created.
    pub fn num_files(&self) -> u64 {
        self.num_files.load(Ordering::SeqCst)
    }

    /// Merge all run files into a single globally sorted file.
    ///
    /// Run files are deleted once fully consumed. Partial merge output is
    /// never observable: an error discards everything via `Drop`.
    pub fn merge(&self) -> std::io::Result<MergeStats> {
        let num_files = self.num_files();

        if num_files == 0 {
            // No observations at all; leave an empty merged file behind so
            // the grouping pass sees an empty stream.
            File::create(self.merged_file_path())?;
            return Ok(MergeStats::default());
        }

        if num_files == 1 {
            let src = self.run_file_path(0);
            let dst = self.merged_file_path();
            fs::rename(&src, &dst)?;
            return self.scan_merged_file();
        }

        info!("Merging {} run files...", num_files);

        let paths: Vec<PathBuf> = (0..num_files).map(|id| self.run_file_path(id)).collect();
        let mut merger = MergingIterator::new(&paths)?;

        let file = File::create(self.merged_file_path())?;
        let mut writer = BufWriter::with_capacity(4 * 1024 * 1024, file);

        let mut stats = MergeStats::default();
        let mut prev_node = u64::MAX;
        while let Some(obs) = merger.next_record() {
            if obs.node != prev_node {
                prev_node = obs.node;
                stats.num_nodes += 1;
            }
            stats.num_observations += 1;
            writer.write_all(&obs.to_bytes())?;

            if stats.num_observations % 100_000_000 == 0 {
                info!("Merged {} observations...", stats.num_observations);
            }
        }
        writer.flush()?;
        drop(merger);

        for path in &paths {
            let _ = fs::remove_file(path);
        }

        info!(
            "Merge complete: {} observations over {} distinct nodes",
            stats.num_observations, stats.num_nodes
        );
        Ok(stats)
    }

    /// Compute statistics for the single-run rename case.
    fn scan_merged_file(&self) -> std::io::Result<MergeStats> {
        let merged = self.merged()?;
        let mut stats = MergeStats::default();
        let mut prev_node = u64::MAX;
        for obs in merged.iter() {
            if obs.node != prev_node {
                prev_node = obs.node;
                stats.num_nodes += 1;
            }
            stats.num_observations += 1;
        }
        Ok(stats)
    }

    /// Memory-mapped view over the merged file, for the grouping pass.
    ///
    /// Call after [`merge`](Self::merge).
    pub fn merged(&self) -> std::io::Result<MergedObservations> {
        let file = File::open(self.merged_file_path())?;
        let byte_len = file.metadata()?.len() as usize;
        let mmap = if byte_len == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(MergedObservations {
            mmap,
            len: byte_len / OBSERVATION_SIZE_BYTES,
        })
    }
}

impl Drop for ObservationSorter {
    fn drop(&mut self) {
        // Reclaim whatever temp files are still around, on every exit path.
        for id in 0..self.num_files() {
            let _ = fs::remove_file(self.run_file_path(id));
        }
        let _ = fs::remove_file(self.merged_file_path());
    }
}

/// Statistics gathered while producing the merged stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    /// Total records in the merged output
    pub num_observations: u64,
    /// Number of distinct node ids observed
    pub num_nodes: u64,
}

/// Read-only view over the merged observation file.
pub struct MergedObservations {
    mmap: Option<Mmap>,
    len: usize,
}

impl MergedObservations {
    /// Number of records in the merged stream.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the merged stream holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate the records in merged (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = Observation> + '_ {
        let base = self.mmap.as_ref().map(|m| m.as_ptr());
        (0..self.len).map(move |i| {
            // SAFETY: i is within the mapped record range; base is Some
            // whenever len > 0.
            unsafe { Observation::from_bytes(base.unwrap().add(i * OBSERVATION_SIZE_BYTES)) }
        })
    }
}

/// Cursor over one memory-mapped run file.
struct RunCursor {
    ptr: *const u8,
    end: *const u8,
}

impl RunCursor {
    #[inline]
    fn head(&self) -> Option<Observation> {
        if self.ptr < self.end {
            // SAFETY: ptr is within the mapped run and record-aligned by
            // construction (advance moves in whole records).
            Some(unsafe { Observation::from_bytes(self.ptr) })
        } else {
            None
        }
    }

    #[inline]
    fn advance(&mut self) {
        self.ptr = unsafe { self.ptr.add(OBSERVATION_SIZE_BYTES) };
    }
}

/// K-way merge over memory-mapped run files.
///
/// With at most [`SCAN_THRESHOLD`] runs the minimum head is found by linear
/// scan (cache-friendly for small fan-in); above that, a binary min-heap
/// keyed by `(record, run index)` gives O(log n) per record.
struct MergingIterator {
    /// Memory-mapped files (kept alive for the cursor pointers)
    #[allow(dead_code)]
    mmaps: Vec<Mmap>,
    cursors: Vec<RunCursor>,
    /// Min-heap of (head record, cursor index); empty in linear-scan mode
    heap: BinaryHeap<Reverse<(Observation, usize)>>,
    use_heap: bool,
}

impl MergingIterator {
    fn new(paths: &[PathBuf]) -> std::io::Result<Self> {
        let mut mmaps = Vec::with_capacity(paths.len());
        let mut cursors = Vec::with_capacity(paths.len());

        for path in paths {
            let file = File::open(path)?;
            if file.metadata()?.len() == 0 {
                continue;
            }
            let mmap = unsafe { Mmap::map(&file)? };
            let begin = mmap.as_ptr();
            let end = unsafe { begin.add(mmap.len()) };
            cursors.push(RunCursor { ptr: begin, end });
            mmaps.push(mmap);
        }

        let use_heap = cursors.len() > SCAN_THRESHOLD;
        let mut heap = BinaryHeap::new();
        if use_heap {
            for (idx, cursor) in cursors.iter().enumerate() {
                if let Some(obs) = cursor.head() {
                    heap.push(Reverse((obs, idx)));
                }
            }
        }

        Ok(Self {
            mmaps,
            cursors,
            heap,
            use_heap,
        })
    }

    /// Emit the smallest head record across all open runs, advancing its
    /// source run.
    fn next_record(&mut self) -> Option<Observation> {
        if self.use_heap {
            let Reverse((obs, idx)) = self.heap.pop()?;
            self.cursors[idx].advance();
            if let Some(next) = self.cursors[idx].head() {
                self.heap.push(Reverse((next, idx)));
            }
            Some(obs)
        } else {
            let mut min: Option<(Observation, usize)> = None;
            for (idx, cursor) in self.cursors.iter().enumerate() {
                if let Some(obs) = cursor.head() {
                    if min.map_or(true, |(best, _)| obs < best) {
                        min = Some((obs, idx));
                    }
                }
            }
            let (obs, idx) = min?;
            self.cursors[idx].advance();
            Some(obs)
        }
    }
}
