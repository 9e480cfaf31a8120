//! Append-only file abstraction: `append`, `read_at`, `write_header`,
//! `read_header`, `truncate`. Writes variable-length, length-prefixed
//! records at a cursor rather than fixed-size pages.
//!
//! The header lives in a reserved fixed-size slot at the start of the file;
//! node records are appended after it. This keeps "read the header, then
//! trust its offsets" recovery simple without a backward header-scan.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::node::Offset;

/// Size of the reserved header slot at the start of the file. Generous
/// enough for a signature, two sequence numbers and a few hundred
/// per-index root offsets.
pub const HEADER_SLOT_SIZE: u64 = 65_536;

pub struct AppendFile {
    file: File,
    cursor: u64,
}

impl AppendFile {
    /// Opens (creating if absent) the file at `path`. The cursor starts
    /// immediately after the reserved header slot if the file is empty.
    pub fn open(path: &Path) -> Result<AppendFile> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let cursor = len.max(HEADER_SLOT_SIZE);
        Ok(AppendFile { file, cursor })
    }

    /// Appends a record, returning the offset it was written at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Offset> {
        let offset = self.cursor;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_u32::<BigEndian>(bytes.len() as u32)?;
        self.file.write_all(bytes)?;
        self.cursor = offset + 4 + bytes.len() as u64;
        Ok(Offset(offset))
    }

    /// Reads the record written at `offset`.
    pub fn read_at(&mut self, offset: Offset) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset.0))?;
        let len = self.file.read_u32::<BigEndian>()?;
        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrites the reserved header slot. Callers must `fsync` the node
    /// region before calling this.
    pub fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        assert!(
            (bytes.len() as u64) + 4 <= HEADER_SLOT_SIZE,
            "header record does not fit the reserved slot"
        );
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_u32::<BigEndian>(bytes.len() as u32)?;
        self.file.write_all(bytes)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Reads the header slot. Returns `None` for a freshly-created (empty)
    /// file with no header written yet.
    pub fn read_header(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.file.metadata()?.len();
        if len < 4 {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(0))?;
        let record_len = self.file.read_u32::<BigEndian>()?;
        if record_len == 0 || record_len as u64 + 4 > HEADER_SLOT_SIZE {
            return Ok(None);
        }
        let mut buf = vec![0u8; record_len as usize];
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Truncates the file back to an empty header slot — used on
    /// `signature_mismatch` recovery.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.set_len(HEADER_SLOT_SIZE)?;
        self.cursor = HEADER_SLOT_SIZE;
        Ok(())
    }

    /// Flushes all node writes to stable storage. Must be called before
    /// `write_header` commits a root that depends on them.
    pub fn fsync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub fn try_clone(&self) -> Result<File> {
        Ok(self.file.try_clone()?)
    }

    /// Reads and decodes the node record at `offset`.
    pub fn get_node(&mut self, offset: Offset) -> Result<crate::node::Node> {
        let bytes = self.read_at(offset)?;
        crate::node::Node::decode(&bytes)
    }
}
