//! K-mer graph collaborator interface.
//!
//! The coloring core never builds or traverses the succinct k-mer graph
//! itself; it consumes the graph through [`KmerGraph`], an oracle mapping a
//! k-mer to its node rank. [`MapGraph`] is a hash-map reference
//! implementation over 2-bit packed k-mers, used by tests and by the CLI's
//! self-contained pipeline.

use crate::constants::MAX_PACKED_K;
use crate::error::{IndexError, Result};
use ahash::AHashMap;
use std::io::{Read, Write};

/// Oracle mapping k-mers to node ids in a succinct k-mer graph.
pub trait KmerGraph {
    /// K-mer length the graph was built with.
    fn k(&self) -> usize;

    /// Node id for a k-mer, or `None` when the k-mer is absent.
    fn lookup_node(&self, kmer: &[u8]) -> Option<u64>;

    /// Total number of addressable node ids.
    fn node_count(&self) -> u64;
}

/// 2-bit code for one nucleotide; `None` for bytes outside ACGT/acgt.
#[inline]
pub(crate) const fn encode_base(base: u8) -> Option<u64> {
    match base {
        b'A' | b'a' => Some(0b00),
        b'C' | b'c' => Some(0b01),
        b'G' | b'g' => Some(0b11),
        b'T' | b't' => Some(0b10),
        _ => None,
    }
}

/// Pack a k-mer into a `u64`, two bits per base, first base in the high
/// bits. `None` when any base falls outside the DNA alphabet. Requires
/// `kmer.len() <= 31`.
pub(crate) fn pack_kmer(kmer: &[u8]) -> Option<u64> {
    debug_assert!(kmer.len() <= MAX_PACKED_K);
    let mut packed = 0u64;
    for &base in kmer {
        packed = (packed << 2) | encode_base(base)?;
    }
    Some(packed)
}

/// Hash-map k-mer graph with node ids assigned in first-seen order.
///
/// K-mers containing bytes outside the DNA alphabet are never indexed and
/// never found; resolving such a k-mer is a lookup miss, not an error.
pub struct MapGraph {
    k: usize,
    nodes: AHashMap<u64, u64>,
}

impl MapGraph {
    /// Index every k-mer of the given sequences.
    ///
    /// # Errors
    /// [`IndexError::InvalidInput`] when `k` is 0 or exceeds the packed
    /// representation's limit of 31.
    pub fn from_sequences<S: AsRef<[u8]>>(sequences: &[S], k: usize) -> Result<Self> {
        if k == 0 || k > MAX_PACKED_K {
            return Err(IndexError::InvalidInput(format!(
                "k must be in 1..={}, got {}",
                MAX_PACKED_K, k
            )));
        }
        let mut nodes = AHashMap::new();
        for seq in sequences {
            let seq = seq.as_ref();
            if seq.len() < k {
                continue;
            }
            for window in seq.windows(k) {
                if let Some(packed) = pack_kmer(window) {
                    let next = nodes.len() as u64;
                    nodes.entry(packed).or_insert(next);
                }
            }
        }
        Ok(Self { k, nodes })
    }

    /// Write the graph: k and entry count as LE u64, then (packed k-mer,
    /// node id) pairs sorted by k-mer for reproducible output.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&(self.k as u64).to_le_bytes())?;
        writer.write_all(&(self.nodes.len() as u64).to_le_bytes())?;

        let mut pairs: Vec<(u64, u64)> = self.nodes.iter().map(|(&k, &v)| (k, v)).collect();
        pairs.sort_unstable();
        for (packed, node) in pairs {
            writer.write_all(&packed.to_le_bytes())?;
            writer.write_all(&node.to_le_bytes())?;
        }
        Ok(())
    }

    /// Read a graph persisted by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let k = u64::from_le_bytes(buf) as usize;
        reader.read_exact(&mut buf)?;
        let count = u64::from_le_bytes(buf);

        let mut nodes = AHashMap::with_capacity(count as usize);
        for _ in 0..count {
            reader.read_exact(&mut buf)?;
            let packed = u64::from_le_bytes(buf);
            reader.read_exact(&mut buf)?;
            let node = u64::from_le_bytes(buf);
            nodes.insert(packed, node);
        }
        Ok(Self { k, nodes })
    }
}

impl KmerGraph for MapGraph {
    #[inline]
    fn k(&self) -> usize {
        self.k
    }

    #[inline]
    fn lookup_node(&self, kmer: &[u8]) -> Option<u64> {
        if kmer.len() != self.k {
            return None;
        }
        self.nodes.get(&pack_kmer(kmer)?).copied()
    }

    #[inline]
    fn node_count(&self) -> u64 {
        self.nodes.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_kmer_case_insensitive() {
        assert_eq!(pack_kmer(b"ACGT"), pack_kmer(b"acgt"));
        assert_ne!(pack_kmer(b"ACGT"), pack_kmer(b"ACGA"));
    }

    #[test]
    fn test_pack_kmer_rejects_ambiguity_codes() {
        assert_eq!(pack_kmer(b"ACNT"), None);
        assert_eq!(pack_kmer(b"ACG-"), None);
    }

    #[test]
    fn test_from_sequences_assigns_dense_ids() {
        let graph = MapGraph::from_sequences(&[b"ACGTA".as_slice()], 3).unwrap();
        // Windows: ACG, CGT, GTA. Three distinct nodes.
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.lookup_node(b"ACG"), Some(0));
        assert_eq!(graph.lookup_node(b"CGT"), Some(1));
        assert_eq!(graph.lookup_node(b"GTA"), Some(2));
        assert_eq!(graph.lookup_node(b"TTT"), None);
    }

    #[test]
    fn test_repeated_kmer_keeps_first_id() {
        let graph = MapGraph::from_sequences(&[b"AAAA".as_slice()], 3).unwrap();
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.lookup_node(b"AAA"), Some(0));
    }

    #[test]
    fn test_lookup_wrong_length_is_miss() {
        let graph = MapGraph::from_sequences(&[b"ACGT".as_slice()], 4).unwrap();
        assert_eq!(graph.lookup_node(b"ACG"), None);
        assert_eq!(graph.lookup_node(b"ACGTA"), None);
    }

    #[test]
    fn test_invalid_k() {
        assert!(MapGraph::from_sequences(&[b"ACGT".as_slice()], 0).is_err());
        assert!(MapGraph::from_sequences(&[b"ACGT".as_slice()], 32).is_err());
    }

    #[test]
    fn test_disk_roundtrip() {
        let graph =
            MapGraph::from_sequences(&[b"ACGTACGTACGT".as_slice(), b"TTGCAATT".as_slice()], 5)
                .unwrap();

        let mut buffer = Vec::new();
        graph.write_to(&mut buffer).unwrap();
        let reloaded = MapGraph::read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(reloaded.k(), 5);
        assert_eq!(reloaded.node_count(), graph.node_count());
        assert_eq!(reloaded.lookup_node(b"ACGTA"), graph.lookup_node(b"ACGTA"));
        assert_eq!(reloaded.lookup_node(b"TGCAA"), graph.lookup_node(b"TGCAA"));
    }
}
