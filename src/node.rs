//! Node codec: (de)serialize tree nodes against the append-only file.
//!
//! Variable-length, length-prefixed records — a node's fan-out and doc-id
//! sizes are not bounded to a fixed page size.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::error::{Error, Result};
use crate::mbr::Mbr;

/// A file offset uniquely identifying an appended record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(pub u64);

const TAG_LEAF: u8 = 0x02;
const TAG_INNER: u8 = 0x01;

/// An opaque document identifier — the caller flattens a (document id,
/// emission index) pair into a single byte string.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocId(pub Vec<u8>);

impl DocId {
    pub fn from_str(s: &str) -> DocId {
        DocId(s.as_bytes().to_vec())
    }
}

/// A leaf entry: a bounding box and the document id that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafEntry {
    pub mbr: Mbr,
    pub doc_id: DocId,
}

/// A tree node: a leaf carrying entries directly, or an inner node carrying
/// offsets to child nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Leaf { mbr: Mbr, entries: Vec<LeafEntry> },
    Inner { mbr: Mbr, children: Vec<Offset> },
}

impl Node {
    pub fn mbr(&self) -> &Mbr {
        match self {
            Node::Leaf { mbr, .. } => mbr,
            Node::Inner { mbr, .. } => mbr,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries, .. } => entries.len(),
            Node::Inner { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_mbr(w: &mut impl Write, mbr: &Mbr) -> io::Result<()> {
        w.write_f64::<BigEndian>(mbr.w)?;
        w.write_f64::<BigEndian>(mbr.s)?;
        w.write_f64::<BigEndian>(mbr.e)?;
        w.write_f64::<BigEndian>(mbr.n)
    }

    fn read_mbr(r: &mut impl Read) -> io::Result<Mbr> {
        let w = r.read_f64::<BigEndian>()?;
        let s = r.read_f64::<BigEndian>()?;
        let e = r.read_f64::<BigEndian>()?;
        let n = r.read_f64::<BigEndian>()?;
        Ok(Mbr::new(w, s, e, n))
    }

    /// Serialize this node to its on-disk record bytes (the file layer adds
    /// the length prefix on append).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Node::Leaf { mbr, entries } => {
                buf.write_u8(TAG_LEAF).unwrap();
                Self::write_mbr(&mut buf, mbr).unwrap();
                buf.write_u32::<BigEndian>(entries.len() as u32).unwrap();
                for entry in entries {
                    Self::write_mbr(&mut buf, &entry.mbr).unwrap();
                    buf.write_u32::<BigEndian>(entry.doc_id.0.len() as u32)
                        .unwrap();
                    buf.extend_from_slice(&entry.doc_id.0);
                }
            }
            Node::Inner { mbr, children } => {
                buf.write_u8(TAG_INNER).unwrap();
                Self::write_mbr(&mut buf, mbr).unwrap();
                buf.write_u32::<BigEndian>(children.len() as u32).unwrap();
                for child in children {
                    buf.write_u64::<BigEndian>(child.0).unwrap();
                }
            }
        }
        buf
    }

    /// Deserialize a node from the bytes of a single record (already
    /// stripped of its length prefix).
    pub fn decode(bytes: &[u8]) -> Result<Node> {
        let mut cur = Cursor::new(bytes);
        let tag = cur.read_u8().map_err(|_| Error::Corrupt(0))?;
        let mbr = Self::read_mbr(&mut cur).map_err(|_| Error::Corrupt(0))?;
        let count = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        match tag {
            TAG_LEAF => {
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let entry_mbr = Self::read_mbr(&mut cur).map_err(|_| Error::Corrupt(0))?;
                    let id_len = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                    let mut id = vec![0u8; id_len as usize];
                    cur.read_exact(&mut id).map_err(|_| Error::Corrupt(0))?;
                    entries.push(LeafEntry {
                        mbr: entry_mbr,
                        doc_id: DocId(id),
                    });
                }
                Ok(Node::Leaf { mbr, entries })
            }
            TAG_INNER => {
                let mut children = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let off = cur.read_u64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                    children.push(Offset(off));
                }
                Ok(Node::Inner { mbr, children })
            }
            _ => Err(Error::Corrupt(0)),
        }
    }
}
