//! Out-of-scope collaborators made concrete: the document
//! database, its change stream, and the spatial function runtime are
//! abstract contracts the coordinator and updater are generic over. This
//! module defines those traits plus an in-memory reference implementation
//! (`testsupport::MemoryDatabase`) the integration tests drive instead of a
//! real document store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::mbr::Mbr;
use crate::node::DocId;

/// One entry in a database's update-sequence stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Updated { doc_id: DocId, seq: u64, body: String },
    Deleted { doc_id: DocId, seq: u64 },
}

impl Change {
    pub fn seq(&self) -> u64 {
        match self {
            Change::Updated { seq, .. } => *seq,
            Change::Deleted { seq, .. } => *seq,
        }
    }

    pub fn doc_id(&self) -> &DocId {
        match self {
            Change::Updated { doc_id, .. } => doc_id,
            Change::Deleted { doc_id, .. } => doc_id,
        }
    }
}

/// A cursor over changes from some starting sequence, in ascending order.
pub trait ChangeStream: Send {
    fn next(&mut self) -> Option<Change>;
}

/// The document database: snapshot reads, update-sequence numbers,
/// committed-sequence numbers, change streams.
pub trait Database: Send + Sync {
    type Changes: ChangeStream;

    /// The latest update sequence assigned, including uncommitted writes.
    fn current_seq(&self) -> u64;

    /// The latest update sequence guaranteed durable. Always `<= current_seq`.
    fn committed_seq(&self) -> u64;

    /// A stream of changes strictly after `since`, ascending by sequence.
    fn changes_since(&self, since: u64) -> Self::Changes;
}

/// The spatial function runtime executing user code against a document;
/// `source_body` selects which of a group's (deduplicated) functions to run.
pub trait SpatialFunction: Send + Sync {
    fn emit(&self, source_body: &str, doc_body: &str) -> Vec<Mbr>;
}

pub mod testsupport {
    use super::*;

    /// An in-memory append-only change log standing in for a real document
    /// database. `committed_seq` trails `current_seq` until `commit()` is
    /// called, so tests can exercise the durability fence in
    /// `group::delayed_commit`.
    pub struct MemoryDatabase {
        inner: Mutex<MemoryDatabaseState>,
    }

    struct MemoryDatabaseState {
        changes: Vec<Change>,
        committed_seq: u64,
    }

    impl MemoryDatabase {
        pub fn new() -> MemoryDatabase {
            MemoryDatabase {
                inner: Mutex::new(MemoryDatabaseState {
                    changes: Vec::new(),
                    committed_seq: 0,
                }),
            }
        }

        /// Appends an update, uncommitted, returning its assigned sequence.
        pub fn put(&self, doc_id: DocId, body: String) -> u64 {
            let mut state = self.inner.lock().unwrap();
            let seq = state.changes.len() as u64 + 1;
            state.changes.push(Change::Updated { doc_id, seq, body });
            seq
        }

        pub fn delete(&self, doc_id: DocId) -> u64 {
            let mut state = self.inner.lock().unwrap();
            let seq = state.changes.len() as u64 + 1;
            state.changes.push(Change::Deleted { doc_id, seq });
            seq
        }

        /// Advances `committed_seq` to the current `current_seq`, simulating
        /// the database flushing its write-ahead log.
        pub fn commit(&self) {
            let mut state = self.inner.lock().unwrap();
            let len = state.changes.len() as u64;
            state.committed_seq = len;
        }
    }

    impl Default for MemoryDatabase {
        fn default() -> Self {
            MemoryDatabase::new()
        }
    }

    impl Database for MemoryDatabase {
        type Changes = MemoryChangeStream;

        fn current_seq(&self) -> u64 {
            self.inner.lock().unwrap().changes.len() as u64
        }

        fn committed_seq(&self) -> u64 {
            self.inner.lock().unwrap().committed_seq
        }

        fn changes_since(&self, since: u64) -> MemoryChangeStream {
            let state = self.inner.lock().unwrap();
            let queue = state
                .changes
                .iter()
                .filter(|c| c.seq() > since)
                .cloned()
                .collect();
            MemoryChangeStream { queue }
        }
    }

    pub struct MemoryChangeStream {
        queue: VecDeque<Change>,
    }

    impl ChangeStream for MemoryChangeStream {
        fn next(&mut self) -> Option<Change> {
            self.queue.pop_front()
        }
    }

    /// A spatial function runtime for tests: a document body of the form
    /// `"w,s,e,n"` (CSV) emits a single box from any `source_body`; an
    /// empty body emits nothing. Good enough to drive the updater end to
    /// end without embedding a real scripting runtime.
    pub struct CsvSpatialFunction;

    impl SpatialFunction for CsvSpatialFunction {
        fn emit(&self, _source_body: &str, doc_body: &str) -> Vec<Mbr> {
            if doc_body.is_empty() {
                return Vec::new();
            }
            let parts: Vec<f64> = doc_body
                .split(',')
                .map(|p| p.trim().parse().expect("doc body must be \"w,s,e,n\""))
                .collect();
            match parts.as_slice() {
                [w, s, e, n] => vec![Mbr::new(*w, *s, *e, *n)],
                _ => Vec::new(),
            }
        }
    }

    pub fn shared<D>(db: D) -> Arc<D> {
        Arc::new(db)
    }

}
