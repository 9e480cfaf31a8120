//! Header record layout: signature, current/purge sequence,
//! id-btree root, one root offset per declared index. A legacy `"rck\0"`
//! magic prefix is accepted on open and rewritten to the current format.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::error::{Error, Result};
use crate::node::Offset;

pub const MAGIC: &[u8; 4] = b"vtr1";
pub const LEGACY_MAGIC: &[u8; 4] = b"rck\0";

const NIL_OFFSET: u64 = u64::MAX;

/// The on-disk, and in-memory, state of one index-group file.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub signature: [u8; 16],
    pub current_seq: u64,
    pub purge_seq: u64,
    pub id_btree_root: Option<Offset>,
    pub roots: Vec<Option<Offset>>,
}

impl Header {
    pub fn empty(signature: [u8; 16], num_indices: usize) -> Header {
        Header {
            signature,
            current_seq: 0,
            purge_seq: 0,
            id_btree_root: None,
            roots: vec![None; num_indices],
        }
    }

    fn write_offset(buf: &mut Vec<u8>, off: Option<Offset>) {
        buf.write_u64::<BigEndian>(off.map(|o| o.0).unwrap_or(NIL_OFFSET))
            .unwrap();
    }

    fn read_offset(cur: &mut Cursor<&[u8]>) -> Result<Option<Offset>> {
        let v = cur.read_u64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        Ok(if v == NIL_OFFSET { None } else { Some(Offset(v)) })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.signature);
        buf.write_u64::<BigEndian>(self.current_seq).unwrap();
        buf.write_u64::<BigEndian>(self.purge_seq).unwrap();
        Self::write_offset(&mut buf, self.id_btree_root);
        buf.write_u32::<BigEndian>(self.roots.len() as u32).unwrap();
        for root in &self.roots {
            Self::write_offset(&mut buf, *root);
        }
        buf
    }

    /// Decodes a header record. Honors the legacy `"rck\0"` magic by
    /// treating it as equivalent to the current format (the field layout
    /// after the magic is unchanged; only the prefix differs), so the very
    /// next `write_header` silently upgrades it.
    pub fn decode(bytes: &[u8]) -> Result<Header> {
        let mut cur = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic).map_err(|_| Error::Corrupt(0))?;
        if &magic != MAGIC && &magic != LEGACY_MAGIC {
            return Err(Error::SignatureMismatch);
        }
        let mut signature = [0u8; 16];
        cur.read_exact(&mut signature).map_err(|_| Error::Corrupt(0))?;
        let current_seq = cur.read_u64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        let purge_seq = cur.read_u64::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        let id_btree_root = Self::read_offset(&mut cur)?;
        let n = cur.read_u32::<BigEndian>().map_err(|_| Error::Corrupt(0))?;
        let mut roots = Vec::with_capacity(n as usize);
        for _ in 0..n {
            roots.push(Self::read_offset(&mut cur)?);
        }
        Ok(Header {
            signature,
            current_seq,
            purge_seq,
            id_btree_root,
            roots,
        })
    }
}
