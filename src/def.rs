//! Spatial index definitions and the group signature: a
//! design document yields named indices grouped by source function body;
//! indices sharing a body share storage, each getting a stable `id_num`
//! assigned by sorting the deduplicated bodies.

use md5::{Digest, Md5};

/// One named spatial index as declared in a design document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexDef {
    pub name: String,
    pub source_body: String,
}

/// The deduplicated, stably-sorted set of index definitions sharing one
/// on-disk file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupDef {
    /// Deduplicated source bodies, sorted — index position is `id_num`.
    pub bodies: Vec<String>,
    pub language: String,
    pub design_options: String,
}

impl GroupDef {
    /// Builds a `GroupDef` from a design document's raw index list,
    /// deduplicating by source body and stably sorting the result.
    pub fn from_indices(indices: &[IndexDef], language: &str, design_options: &str) -> GroupDef {
        let mut bodies: Vec<String> = indices.iter().map(|i| i.source_body.clone()).collect();
        bodies.sort();
        bodies.dedup();
        GroupDef {
            bodies,
            language: language.to_string(),
            design_options: design_options.to_string(),
        }
    }

    pub fn num_indices(&self) -> usize {
        self.bodies.len()
    }

    /// `id_num` for a given source body, if declared in this group.
    pub fn id_num(&self, source_body: &str) -> Option<usize> {
        self.bodies.iter().position(|b| b == source_body)
    }

    /// The 16-byte MD5 signature over `(indices, language, design_options)`
    /// — the key to the on-disk file.
    pub fn signature(&self) -> [u8; 16] {
        let mut hasher = Md5::new();
        for body in &self.bodies {
            hasher.update(body.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.language.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.design_options.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest);
        out
    }

    pub fn signature_hex(&self) -> String {
        self.signature().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// `<root_dir>/<db_design_root>/<hex(signature)>.spatial`.
pub fn index_file_path(
    root_dir: &std::path::Path,
    db_design_root: &str,
    signature_hex: &str,
) -> std::path::PathBuf {
    root_dir
        .join(db_design_root)
        .join(format!("{}.spatial", signature_hex))
}
