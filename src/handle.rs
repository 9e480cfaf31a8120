//! Reference-counted file handle: keeps a memory-mapped read view of the
//! index file alive for a reader across subsequent header rewrites.
//! Built on `memmap2` — the same role `arroy` uses it for in an on-disk
//! ANN index.
//!
//! Readers only ever dereference offsets that were already durable (synced
//! to disk and named by a header) at the moment their snapshot was handed
//! out, so a read-only mapping taken at snapshot time never goes stale even
//! though the live file keeps growing underneath it.

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{Node, Offset};

#[derive(Clone)]
pub struct RefCountedFile {
    mmap: Arc<Mmap>,
}

impl RefCountedFile {
    /// Maps the current contents of `path` read-only.
    pub fn open(path: &Path) -> Result<RefCountedFile> {
        let file = File::open(path)?;
        // Safety: the file is append-only and never truncated while a
        // mapping is held by a live reader (truncation only happens on
        // `signature_mismatch` recovery, before any group handle exists).
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(RefCountedFile { mmap: Arc::new(mmap) })
    }

    pub fn from_file(file: &File) -> Result<RefCountedFile> {
        let mmap = unsafe { Mmap::map(file)? };
        Ok(RefCountedFile { mmap: Arc::new(mmap) })
    }

    /// Increments the reference count by handing out a clone. Readers must
    /// call this before use so the mapping outlives any header rewrite.
    pub fn add_ref(&self) -> RefCountedFile {
        self.clone()
    }

    /// Number of outstanding handles (including this one) sharing the
    /// underlying mapping.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.mmap)
    }

    pub fn read_node(&self, offset: Offset) -> Result<Node> {
        let bytes = &self.mmap[..];
        let start = offset.0 as usize;
        if start + 4 > bytes.len() {
            return Err(Error::Corrupt(offset.0));
        }
        let len = u32::from_be_bytes(bytes[start..start + 4].try_into().unwrap()) as usize;
        let data_start = start + 4;
        let data_end = data_start + len;
        if data_end > bytes.len() {
            return Err(Error::Corrupt(offset.0));
        }
        Node::decode(&bytes[data_start..data_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::AppendFile;
    use crate::mbr::Mbr;
    use crate::node::{DocId, LeafEntry};
    use tempfile::tempdir;

    #[test]
    fn reads_node_written_before_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.spatial");
        let offset = {
            let mut f = AppendFile::open(&path).unwrap();
            let node = Node::Leaf {
                mbr: Mbr::new(0.0, 0.0, 1.0, 1.0),
                entries: vec![LeafEntry {
                    mbr: Mbr::new(0.0, 0.0, 1.0, 1.0),
                    doc_id: DocId::from_str("a"),
                }],
            };
            let off = f.append(&node.encode()).unwrap();
            f.fsync().unwrap();
            off
        };
        let handle = RefCountedFile::open(&path).unwrap();
        let node = handle.read_node(offset).unwrap();
        assert_eq!(node.len(), 1);
    }

    #[test]
    fn add_ref_increments_count() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.spatial");
        AppendFile::open(&path).unwrap();
        let handle = RefCountedFile::open(&path).unwrap();
        assert_eq!(handle.ref_count(), 1);
        let _second = handle.add_ref();
        assert_eq!(handle.ref_count(), 2);
    }
}
