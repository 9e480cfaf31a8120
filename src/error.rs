use std::io;

/// Errors surfaced across the tree engine, the file layer and the group
/// coordinator.
///
/// Per the error-handling policy: only `SignatureMismatch` is
/// recovered locally (the file is truncated and reset); everything else is
/// surfaced to the caller that triggered it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("requested sequence {requested} exceeds database sequence {available}")]
    InvalidViewSeq { requested: u64, available: u64 },

    #[error("delete target not found")]
    NotFound,

    #[error("on-disk signature does not match the current index definition")]
    SignatureMismatch,

    #[error("corrupt record at offset {0}")]
    Corrupt(u64),

    #[error("updater crashed: {0}")]
    UpdaterCrashed(String),

    #[error("group shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
