//! Deduplicated storage of distinct color sets.
//!
//! Genomic colorings are extremely redundant: conserved k-mers shared by most
//! or all input sequences collapse onto a small number of distinct color
//! sets. The table stores one encoded blob per distinct set and hands out
//! dense set ids, so index size scales with color-set diversity rather than
//! node count.

use crate::color_set::ColorSet;
use crate::error::{IndexError, Result, Stage};
use ahash::AHashMap;
use std::io::{Read, Write};

/// Append-only table mapping distinct color sets to set ids.
///
/// Ids are assigned in first-seen order: deterministic within a single
/// build, but not stable across rebuilds that intern in a different order.
#[derive(Debug, Default)]
pub struct ColorSetTable {
    /// Encoded sets, indexed by set id.
    sets: Vec<ColorSet>,
    /// Build-phase dedup map keyed by decoded values (value equality, not
    /// encoding bytes). Left empty on tables loaded from disk, which are
    /// resolve-only.
    dedup: AHashMap<Box<[u64]>, u64>,
}

impl ColorSetTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a sorted, duplicate-free color sequence.
    ///
    /// Returns the existing id when a value-identical set was interned
    /// before; otherwise encodes the set and assigns the next unused id.
    ///
    /// # Errors
    /// [`IndexError::InvalidInput`] when `values` is not strictly increasing.
    pub fn intern(&mut self, values: &[u64]) -> Result<u64> {
        if let Some(&id) = self.dedup.get(values) {
            return Ok(id);
        }
        let set = ColorSet::from_sorted(values)?;
        let id = self.sets.len() as u64;
        self.sets.push(set);
        self.dedup.insert(values.into(), id);
        Ok(id)
    }

    /// Decode handle for a set id.
    ///
    /// # Errors
    /// [`IndexError::UnknownSetId`] when the id was never assigned.
    #[inline]
    pub fn resolve(&self, id: u64) -> Result<&ColorSet> {
        self.sets.get(id as usize).ok_or(IndexError::UnknownSetId {
            id,
            count: self.sets.len() as u64,
        })
    }

    /// Number of distinct sets interned.
    #[inline]
    pub fn count(&self) -> u64 {
        self.sets.len() as u64
    }

    /// Total encoded size across all sets, in bytes.
    pub fn encoded_bytes(&self) -> usize {
        self.sets.iter().map(|s| s.encoded_bytes()).sum()
    }

    /// Write the table: 8-byte LE distinct-set count, then each set's framed
    /// blob in assignment order (set id = positional index).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&(self.sets.len() as u64).to_le_bytes())?;
        for set in &self.sets {
            set.write_to(writer)?;
        }
        Ok(())
    }

    /// Read a table persisted by [`write_to`](Self::write_to).
    ///
    /// The result is resolve-only: its dedup map is empty, since the query
    /// phase never interns.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut count_bytes = [0u8; 8];
        reader
            .read_exact(&mut count_bytes)
            .map_err(|e| IndexError::read_failure(Stage::Table, e))?;
        let count = u64::from_le_bytes(count_bytes);

        let mut sets = Vec::new();
        for _ in 0..count {
            sets.push(ColorSet::read_from(reader)?);
        }
        Ok(Self {
            sets,
            dedup: AHashMap::new(),
        })
    }
}
