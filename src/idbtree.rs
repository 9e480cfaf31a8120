//! The id-btree: a snapshot of `doc_id -> [(index_num, mbr)]`, persisted as
//! a single appended record each checkpoint.
//!
//! The updater diffs the previous snapshot against a document's freshly
//! computed emissions to derive the per-index `removes`/`adds` batches
//! `tree::add_remove` expects; it never walks the spatial trees to find a
//! document's prior entries.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::{Error, Result};
use crate::mbr::Mbr;
use crate::node::DocId;

/// One prior emission: which index it was emitted into, and the box it
/// produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    pub index_num: u32,
    pub mbr: Mbr,
}

/// `doc_id -> emissions`, sorted by `doc_id` for deterministic encoding.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct IdBTree {
    entries: BTreeMap<DocId, Vec<Emission>>,
}

impl IdBTree {
    pub fn new() -> IdBTree {
        IdBTree::default()
    }

    pub fn get(&self, doc_id: &DocId) -> Option<&[Emission]> {
        self.entries.get(doc_id).map(|v| v.as_slice())
    }

    /// Replaces (or removes, if `emissions` is empty) the entry for `doc_id`.
    pub fn set(&mut self, doc_id: DocId, emissions: Vec<Emission>) {
        if emissions.is_empty() {
            self.entries.remove(&doc_id);
        } else {
            self.entries.insert(doc_id, emissions);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(self.entries.len() as u32).unwrap();
        for (doc_id, emissions) in &self.entries {
            buf.write_u32::<BigEndian>(doc_id.0.len() as u32).unwrap();
            buf.extend_from_slice(&doc_id.0);
            buf.write_u32::<BigEndian>(emissions.len() as u32).unwrap();
            for e in emissions {
                buf.write_u32::<BigEndian>(e.index_num).unwrap();
                buf.write_f64::<BigEndian>(e.mbr.w).unwrap();
                buf.write_f64::<BigEndian>(e.mbr.s).unwrap();
                buf.write_f64::<BigEndian>(e.mbr.e).unwrap();
                buf.write_f64::<BigEndian>(e.mbr.n).unwrap();
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<IdBTree> {
        let mut cur = Cursor::new(bytes);
        let doc_count = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        let mut entries = BTreeMap::new();
        for _ in 0..doc_count {
            let id_len = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
            let mut id = vec![0u8; id_len as usize];
            cur.read_exact(&mut id).map_err(|_| Error::Corrupt(0))?;
            let emission_count = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
            let mut emissions = Vec::with_capacity(emission_count as usize);
            for _ in 0..emission_count {
                let index_num = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                let w = cur.read_f64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                let s = cur.read_f64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                let e = cur.read_f64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                let n = cur.read_f64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
                emissions.push(Emission {
                    index_num,
                    mbr: Mbr::new(w, s, e, n),
                });
            }
            entries.insert(DocId(id), emissions);
        }
        Ok(IdBTree { entries })
    }
}

/// Implements `Ord`/`PartialOrd` for `DocId` so it can key a `BTreeMap`.
/// Byte-lexicographic order — arbitrary but stable, which is all the
/// snapshot's determinism requires.
impl Eq for DocId {}
impl PartialOrd for DocId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DocId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}
