//! Serialization of the color index (and the companion reference graph).
//!
//! # File format
//!
//! **Index file** (`<base>.cix`):
//! - IndexHeader (magic `"IRISCIX1"`, version, k, num_colors)
//! - ColorSetTable: distinct-set count, then each set's framed blob in
//!   assignment order (set id = positional index)
//! - NodeMap: node count, sentinel, packed entries (epserde format)
//!
//! **Graph file** (`<base>.cix.graph`, written by callers that use the
//! bundled [`MapGraph`](crate::MapGraph) collaborator):
//! - GraphHeader (magic `"IRISMAP1"`, version)
//! - MapGraph payload
//!
//! Writers go through a `.tmp` sibling renamed into place at the end, so a
//! half-written index is never observable under its final name. Wrong magic
//! or an incompatible major version is reported as corruption.

use crate::color_table::ColorSetTable;
use crate::error::{IndexError, Result, Stage};
use crate::graph::MapGraph;
use crate::index::ColorIndex;
use crate::node_map::NodeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the index file format
const MAGIC: &[u8; 8] = b"IRISCIX1";

/// Magic bytes for the companion graph file format
const GRAPH_MAGIC: &[u8; 8] = b"IRISMAP1";

/// File format version: (major, minor).
/// Increment major on breaking changes, minor on compatible changes.
const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Header for the serialized index
#[derive(Clone, Debug)]
pub struct IndexHeader {
    /// Format version (major, minor)
    pub version: (u32, u32),
    /// K-mer size
    pub k: usize,
    /// Number of colors in the build
    pub num_colors: u64,
}

impl IndexHeader {
    /// Create a header for the current format version.
    pub fn new(k: usize, num_colors: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            k,
            num_colors,
        }
    }

    /// Write header to a writer.
    pub fn write(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&self.version.0.to_le_bytes())?;
        writer.write_all(&self.version.1.to_le_bytes())?;
        writer.write_all(&(self.k as u64).to_le_bytes())?;
        writer.write_all(&self.num_colors.to_le_bytes())?;
        Ok(())
    }

    /// Read and validate a header.
    pub fn read(reader: &mut dyn Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
        if &magic != MAGIC {
            return Err(IndexError::corrupt(
                Stage::Persist,
                "invalid magic number for iris index file",
            ));
        }

        let mut u32_buf = [0u8; 4];
        let mut u64_buf = [0u8; 8];

        reader
            .read_exact(&mut u32_buf)
            .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
        let version_major = u32::from_le_bytes(u32_buf);
        reader
            .read_exact(&mut u32_buf)
            .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
        let version_minor = u32::from_le_bytes(u32_buf);

        if version_major != FORMAT_VERSION.0 {
            return Err(IndexError::corrupt(
                Stage::Persist,
                format!(
                    "incompatible format version {}.{}, expected {}.{}",
                    version_major, version_minor, FORMAT_VERSION.0, FORMAT_VERSION.1
                ),
            ));
        }

        reader
            .read_exact(&mut u64_buf)
            .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
        let k = u64::from_le_bytes(u64_buf) as usize;
        reader
            .read_exact(&mut u64_buf)
            .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
        let num_colors = u64::from_le_bytes(u64_buf);

        Ok(Self {
            version: (version_major, version_minor),
            k,
            num_colors,
        })
    }
}

/// Build the index file path from a base path.
pub fn index_file_path<P: AsRef<Path>>(base: P) -> PathBuf {
    let mut path = base.as_ref().to_path_buf();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    if ext == "cix" {
        path
    } else if ext.is_empty() {
        path.set_extension("cix");
        path
    } else {
        path.set_extension(format!("{ext}.cix"));
        path
    }
}

/// Build the companion graph file path from a base path.
pub fn graph_file_path<P: AsRef<Path>>(base: P) -> PathBuf {
    let index_path = index_file_path(base);
    let mut graph_path = index_path.clone();
    let filename = format!(
        "{}.graph",
        index_path.file_name().unwrap().to_string_lossy()
    );
    graph_path.pop();
    graph_path.push(filename);
    graph_path
}

/// Sibling path used while a file is being written.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let filename = format!("{}.tmp", path.file_name().unwrap().to_string_lossy());
    tmp.pop();
    tmp.push(filename);
    tmp
}

/// Persist an index. Returns the final index file path.
pub fn save_index<P: AsRef<Path>>(index: &ColorIndex, path: P) -> Result<PathBuf> {
    let final_path = index_file_path(path.as_ref());
    let tmp_path = tmp_sibling(&final_path);

    match write_index_file(index, &tmp_path) {
        Ok(()) => {
            fs::rename(&tmp_path, &final_path).map_err(|e| IndexError::io(Stage::Persist, e))?;
            Ok(final_path)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_index_file(index: &ColorIndex, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| IndexError::io(Stage::Persist, e))?;
    let mut writer = BufWriter::with_capacity(1024 * 1024, file);

    IndexHeader::new(index.k(), index.num_colors())
        .write(&mut writer)
        .map_err(|e| IndexError::io(Stage::Persist, e))?;
    index
        .table()
        .write_to(&mut writer)
        .map_err(|e| IndexError::io(Stage::Table, e))?;
    index
        .node_map()
        .write_to(&mut writer)
        .map_err(|e| IndexError::io(Stage::Map, e))?;

    writer.flush().map_err(|e| IndexError::io(Stage::Persist, e))?;
    Ok(())
}

/// Load a persisted index.
pub fn load_index<P: AsRef<Path>>(path: P) -> Result<ColorIndex> {
    let path = index_file_path(path.as_ref());
    let file = File::open(&path).map_err(|e| IndexError::io(Stage::Persist, e))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);

    let header = IndexHeader::read(&mut reader)?;
    let table = ColorSetTable::read_from(&mut reader)?;
    let node_map = NodeMap::read_from(&mut reader)?;

    Ok(ColorIndex::new(
        header.k,
        header.num_colors,
        table,
        node_map,
    ))
}

/// Persist the bundled reference graph next to its index.
pub fn save_graph<P: AsRef<Path>>(graph: &MapGraph, base: P) -> Result<PathBuf> {
    let final_path = graph_file_path(base);
    let tmp_path = tmp_sibling(&final_path);

    let write = || -> std::io::Result<()> {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::with_capacity(1024 * 1024, file);
        writer.write_all(GRAPH_MAGIC)?;
        writer.write_all(&FORMAT_VERSION.0.to_le_bytes())?;
        writer.write_all(&FORMAT_VERSION.1.to_le_bytes())?;
        graph.write_to(&mut writer)?;
        writer.flush()
    };

    match write() {
        Ok(()) => {
            fs::rename(&tmp_path, &final_path).map_err(|e| IndexError::io(Stage::Persist, e))?;
            Ok(final_path)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(IndexError::io(Stage::Persist, e))
        }
    }
}

/// Load a reference graph persisted by [`save_graph`].
pub fn load_graph<P: AsRef<Path>>(base: P) -> Result<MapGraph> {
    let path = graph_file_path(base);
    let file = File::open(&path).map_err(|e| IndexError::io(Stage::Persist, e))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, file);

    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
    if &magic != GRAPH_MAGIC {
        return Err(IndexError::corrupt(
            Stage::Persist,
            "invalid magic number for iris graph file",
        ));
    }

    let mut u32_buf = [0u8; 4];
    reader
        .read_exact(&mut u32_buf)
        .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
    let version_major = u32::from_le_bytes(u32_buf);
    reader
        .read_exact(&mut u32_buf)
        .map_err(|e| IndexError::read_failure(Stage::Persist, e))?;
    if version_major != FORMAT_VERSION.0 {
        return Err(IndexError::corrupt(
            Stage::Persist,
            format!("incompatible graph format version {}", version_major),
        ));
    }

    MapGraph::read_from(&mut reader).map_err(|e| IndexError::read_failure(Stage::Persist, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = IndexHeader::new(31, 1000);

        let mut buffer = Vec::new();
        header.write(&mut buffer).unwrap();
        let header2 = IndexHeader::read(&mut buffer.as_slice()).unwrap();

        assert_eq!(header2.k, 31);
        assert_eq!(header2.num_colors, 1000);
        assert_eq!(header2.version, FORMAT_VERSION);
    }

    #[test]
    fn test_header_rejects_wrong_magic() {
        let mut buffer = Vec::new();
        IndexHeader::new(21, 5).write(&mut buffer).unwrap();
        buffer[0] = b'X';

        assert!(matches!(
            IndexHeader::read(&mut buffer.as_slice()),
            Err(IndexError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_header_rejects_major_version_mismatch() {
        let mut buffer = Vec::new();
        IndexHeader {
            version: (FORMAT_VERSION.0 + 1, 0),
            k: 21,
            num_colors: 5,
        }
        .write(&mut buffer)
        .unwrap();

        assert!(matches!(
            IndexHeader::read(&mut buffer.as_slice()),
            Err(IndexError::CorruptData { .. })
        ));
    }

    #[test]
    fn test_file_path_construction() {
        let base = Path::new("/tmp/my_index");
        let index = index_file_path(base);
        assert!(index.to_string_lossy().ends_with("my_index.cix"));

        // Already carrying the extension: unchanged.
        assert_eq!(index_file_path(&index), index);

        let graph = graph_file_path(base);
        assert!(graph.to_string_lossy().ends_with("my_index.cix.graph"));
    }
}
