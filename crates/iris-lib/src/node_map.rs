//! Fixed-width map from graph node ids to color set ids.
//!
//! One entry per addressable node, `ceil_log2(num_sets + 1)` bits each; the
//! value `num_sets` is the in-band sentinel for nodes never observed with any
//! color. Set ids are not dense until interning finishes, so the build pass
//! stages entries in a plain vector and compacts them into a `BitFieldVec`
//! once the distinct-set count is final.

use crate::constants::ceil_log2;
use crate::error::{IndexError, Result, Stage};
use std::io::{Read, Write};
use sux::bits::bit_field_vec::BitFieldVec;
use value_traits::slices::{SliceByValue, SliceByValueMut};

/// Staging buffer for the node map, filled during the build pass.
pub struct NodeMapBuilder {
    entries: Vec<u64>,
}

impl NodeMapBuilder {
    /// One entry per addressable node, all initially unset.
    pub fn new(node_count: u64) -> Self {
        Self {
            entries: vec![u64::MAX; node_count as usize],
        }
    }

    /// Record the set id for a node.
    ///
    /// Panics if `node` is outside the addressable range.
    #[inline]
    pub fn set(&mut self, node: u64, set_id: u64) {
        self.entries[node as usize] = set_id;
    }

    /// Compact into the frozen fixed-width form, with `num_sets` as the
    /// sentinel for entries never set.
    pub fn freeze(self, num_sets: u64) -> NodeMap {
        let width = ceil_log2(num_sets + 1).max(1);
        let mut ids = BitFieldVec::new(width, self.entries.len());
        for (i, &entry) in self.entries.iter().enumerate() {
            let stored = if entry == u64::MAX { num_sets } else { entry };
            ids.set_value(i, stored as usize);
        }
        NodeMap { ids, num_sets }
    }
}

/// Frozen node → set-id map. Immutable after the build; any number of
/// reader threads may call [`get`](Self::get) concurrently.
#[derive(Debug)]
pub struct NodeMap {
    ids: BitFieldVec<Vec<usize>>,
    num_sets: u64,
}

impl NodeMap {
    /// Set id for a node, or `None` for nodes never observed with a color.
    ///
    /// Panics if `node` is outside the addressable range.
    #[inline]
    pub fn get(&self, node: u64) -> Option<u64> {
        assert!(
            (node as usize) < self.ids.len(),
            "node id {} out of bounds ({} nodes)",
            node,
            self.ids.len()
        );
        let stored = self.ids.index_value(node as usize) as u64;
        (stored != self.num_sets).then_some(stored)
    }

    /// Number of addressable nodes.
    #[inline]
    pub fn node_count(&self) -> u64 {
        self.ids.len() as u64
    }

    /// Bytes used by the packed entries.
    pub fn num_bytes(&self) -> usize {
        std::mem::size_of_val(self.ids.as_slice())
    }

    /// Write the map: node count and sentinel as LE u64, then the packed
    /// entries in epserde format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        use epserde::ser::Serialize;

        writer.write_all(&(self.ids.len() as u64).to_le_bytes())?;
        writer.write_all(&self.num_sets.to_le_bytes())?;
        // SAFETY: BitFieldVec serialization preserves data layout
        unsafe {
            self.ids
                .serialize(writer)
                .map_err(std::io::Error::other)?
        };
        Ok(())
    }

    /// Read a map persisted by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        use epserde::deser::Deserialize;

        let mut buf = [0u8; 8];
        reader
            .read_exact(&mut buf)
            .map_err(|e| IndexError::read_failure(Stage::Map, e))?;
        let node_count = u64::from_le_bytes(buf);
        reader
            .read_exact(&mut buf)
            .map_err(|e| IndexError::read_failure(Stage::Map, e))?;
        let num_sets = u64::from_le_bytes(buf);

        // SAFETY: reading data serialized by our own write_to
        let ids = unsafe { BitFieldVec::<Vec<usize>>::deserialize_full(reader) }
            .map_err(|e| IndexError::corrupt(Stage::Map, e.to_string()))?;

        if ids.len() as u64 != node_count {
            return Err(IndexError::corrupt(
                Stage::Map,
                format!(
                    "entry count {} does not match header ({})",
                    ids.len(),
                    node_count
                ),
            ));
        }
        Ok(Self { ids, num_sets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_entries_are_sentinel() {
        let mut builder = NodeMapBuilder::new(5);
        builder.set(1, 0);
        builder.set(3, 2);
        let map = builder.freeze(3);

        assert_eq!(map.get(0), None);
        assert_eq!(map.get(1), Some(0));
        assert_eq!(map.get(2), None);
        assert_eq!(map.get(3), Some(2));
        assert_eq!(map.get(4), None);
        assert_eq!(map.node_count(), 5);
    }

    #[test]
    fn test_zero_sets() {
        // No set was ever interned: every entry reads back as unset.
        let map = NodeMapBuilder::new(4).freeze(0);
        for node in 0..4 {
            assert_eq!(map.get(node), None);
        }
    }

    #[test]
    fn test_set_id_zero_is_distinct_from_sentinel() {
        let mut builder = NodeMapBuilder::new(2);
        builder.set(0, 0);
        let map = builder.freeze(1);
        assert_eq!(map.get(0), Some(0));
        assert_eq!(map.get(1), None);
    }

    #[test]
    fn test_disk_roundtrip() {
        let mut builder = NodeMapBuilder::new(100);
        for node in (0..100).step_by(3) {
            builder.set(node, node % 7);
        }
        let map = builder.freeze(7);

        let mut buffer = Vec::new();
        map.write_to(&mut buffer).unwrap();
        let reloaded = NodeMap::read_from(&mut buffer.as_slice()).unwrap();

        assert_eq!(reloaded.node_count(), 100);
        for node in 0..100 {
            assert_eq!(reloaded.get(node), map.get(node), "node {}", node);
        }
    }

    #[test]
    fn test_truncated_map_fails() {
        let map = NodeMapBuilder::new(10).freeze(2);
        let mut buffer = Vec::new();
        map.write_to(&mut buffer).unwrap();
        buffer.truncate(12);
        assert!(NodeMap::read_from(&mut buffer.as_slice()).is_err());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_range_node_panics() {
        let map = NodeMapBuilder::new(3).freeze(1);
        let _ = map.get(3);
    }
}
