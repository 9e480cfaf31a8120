//! Group coordinator: one task per index group, state serialized on that
//! task's mailbox. Readers only ever talk to it through
//! `GroupHandle::request_group`; everything else (`partial_update`,
//! `updater_finished`, `delayed_commit`, `db_monitor_down`,
//! `updater_crash`) is an internal message the task sends itself or
//! receives from the spawned updater.
//!
//! One task owns the file at a time; it hands ownership to a spawned
//! updater for the duration of a catch-up pass and takes it back when the
//! updater finishes, so concurrent readers are served without ever blocking
//! on the writer.

pub mod updater;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::GroupConfig;
use crate::db::{Database, SpatialFunction};
use crate::def::GroupDef;
use crate::error::{Error, Result};
use crate::file::AppendFile;
use crate::handle::RefCountedFile;
use crate::header::Header;
use crate::idbtree::IdBTree;

/// What a satisfied reader gets back: the index state and a ref-counted
/// handle it must hold for as long as it reads from the snapshot.
pub type Snapshot = (Header, RefCountedFile);

enum Message {
    RequestGroup {
        requested_seq: u64,
        reply: oneshot::Sender<Result<Snapshot>>,
    },
    PartialUpdate {
        group: Header,
        id_tree: IdBTree,
    },
    UpdaterFinished {
        group: Header,
        id_tree: IdBTree,
        file: AppendFile,
    },
    DelayedCommit,
    DbMonitorDown,
    UpdaterCrash(String),
}

/// A handle to a running group task. Cloning shares the same mailbox.
#[derive(Clone)]
pub struct GroupHandle {
    sender: mpsc::Sender<Message>,
}

impl GroupHandle {
    /// Opens (or resets, on signature mismatch) the index file at `path`
    /// and spawns its coordinator task.
    pub fn spawn<D, F>(
        db: Arc<D>,
        spatial_fn: Arc<F>,
        def: GroupDef,
        path: PathBuf,
        config: GroupConfig,
    ) -> Result<GroupHandle>
    where
        D: Database + 'static,
        F: SpatialFunction + 'static,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = AppendFile::open(&path)?;
        let signature = def.signature();

        let group = match file.read_header()? {
            Some(bytes) => match Header::decode(&bytes) {
                Ok(h) if h.signature == signature => h,
                Ok(_) | Err(Error::SignatureMismatch) => {
                    tracing::warn!(path = %path.display(), "index signature mismatch, resetting file");
                    file.truncate()?;
                    let fresh = Header::empty(signature, def.num_indices());
                    file.write_header(&fresh.encode())?;
                    fresh
                }
                Err(e) => return Err(e),
            },
            None => {
                let fresh = Header::empty(signature, def.num_indices());
                file.write_header(&fresh.encode())?;
                fresh
            }
        };

        let handle = RefCountedFile::open(&path)?;
        let (tx, rx) = mpsc::channel(64);
        let actor = GroupActor {
            path,
            file: Some(file),
            handle,
            group,
            id_tree: IdBTree::new(),
            def,
            config,
            db,
            spatial_fn,
            waiters: Vec::new(),
            updater_running: false,
            waiting_commit: false,
            self_sender: tx.clone(),
        };
        tokio::spawn(actor.run(rx));
        Ok(GroupHandle { sender: tx })
    }

    /// Asks for a snapshot at least as fresh as `requested_seq`. Suspends
    /// until the index reaches that sequence or the group fails.
    pub async fn request_group(&self, requested_seq: u64) -> Result<Snapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(Message::RequestGroup {
                requested_seq,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Shutdown)?;
        reply_rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Signals that the owning database has closed. All waiters are woken
    /// with `Error::Shutdown` and the group task terminates.
    pub async fn db_monitor_down(&self) {
        let _ = self.sender.send(Message::DbMonitorDown).await;
    }
}

struct GroupActor<D, F> {
    path: PathBuf,
    file: Option<AppendFile>,
    handle: RefCountedFile,
    group: Header,
    id_tree: IdBTree,
    def: GroupDef,
    config: GroupConfig,
    db: Arc<D>,
    spatial_fn: Arc<F>,
    waiters: Vec<(oneshot::Sender<Result<Snapshot>>, u64)>,
    updater_running: bool,
    waiting_commit: bool,
    self_sender: mpsc::Sender<Message>,
}

impl<D, F> GroupActor<D, F>
where
    D: Database + 'static,
    F: SpatialFunction + 'static,
{
    async fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::RequestGroup {
                    requested_seq,
                    reply,
                } => self.on_request_group(requested_seq, reply),
                Message::PartialUpdate { group, id_tree } => {
                    self.on_partial_update(group, id_tree)
                }
                Message::UpdaterFinished {
                    group,
                    id_tree,
                    file,
                } => self.on_updater_finished(group, id_tree, file),
                Message::DelayedCommit => self.on_delayed_commit().await,
                Message::DbMonitorDown => {
                    self.drain_waiters(|| Error::Shutdown);
                    break;
                }
                Message::UpdaterCrash(reason) => {
                    tracing::error!(%reason, "spatial updater crashed");
                    self.drain_waiters(|| Error::UpdaterCrashed(reason.clone()));
                    break;
                }
            }
        }
    }

    fn on_request_group(&mut self, requested_seq: u64, reply: oneshot::Sender<Result<Snapshot>>) {
        if requested_seq <= self.group.current_seq {
            let _ = reply.send(Ok((self.group.clone(), self.handle.add_ref())));
            return;
        }
        let available = self.db.current_seq();
        if requested_seq > available {
            let _ = reply.send(Err(Error::InvalidViewSeq {
                requested: requested_seq,
                available,
            }));
            return;
        }
        self.waiters.push((reply, requested_seq));
        if !self.updater_running {
            self.spawn_updater();
        }
    }

    fn on_partial_update(&mut self, group: Header, id_tree: IdBTree) {
        self.group = group;
        self.id_tree = id_tree;
        self.refresh_handle();
        if !self.waiting_commit {
            self.waiting_commit = true;
            self.arm_commit_timer();
        }
    }

    fn on_updater_finished(&mut self, group: Header, id_tree: IdBTree, file: AppendFile) {
        self.file = Some(file);
        self.updater_running = false;
        self.group = group;
        self.id_tree = id_tree;
        self.refresh_handle();
        if !self.waiting_commit {
            self.waiting_commit = true;
            self.arm_commit_timer();
        }

        let current_seq = self.group.current_seq;
        let mut remaining = Vec::new();
        for (reply, requested_seq) in self.waiters.drain(..) {
            if requested_seq <= current_seq {
                let _ = reply.send(Ok((self.group.clone(), self.handle.add_ref())));
            } else {
                remaining.push((reply, requested_seq));
            }
        }
        self.waiters = remaining;

        if !self.waiters.is_empty() {
            // Both respawn sites funnel through spawn_updater so a waiter
            // still unsatisfied after one catch-up pass always gets another.
            self.spawn_updater();
        }
    }

    async fn on_delayed_commit(&mut self) {
        let file = match self.file.as_mut() {
            Some(f) => f,
            None => {
                self.arm_commit_timer();
                return;
            }
        };
        let committed = self.db.committed_seq();
        if committed >= self.group.current_seq {
            match file.write_header(&self.group.encode()) {
                Ok(()) => {
                    tracing::debug!(seq = self.group.current_seq, "committed index header");
                    self.waiting_commit = false;
                }
                Err(e) => tracing::error!(error = %e, "failed to commit index header"),
            }
        } else {
            self.arm_commit_timer();
        }
    }

    fn spawn_updater(&mut self) {
        let file = match self.file.take() {
            Some(f) => f,
            None => return,
        };
        self.updater_running = true;
        let db = self.db.clone();
        let spatial_fn = self.spatial_fn.clone();
        let def = self.def.clone();
        let config = self.config;
        let group = self.group.clone();
        let id_tree = self.id_tree.clone();
        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            updater::run(file, db, spatial_fn, def, config, group, id_tree, sender).await;
        });
    }

    fn refresh_handle(&mut self) {
        match RefCountedFile::open(&self.path) {
            Ok(h) => self.handle = h,
            Err(e) => tracing::error!(error = %e, "failed to refresh reader handle"),
        }
    }

    fn arm_commit_timer(&self) {
        let sender = self.self_sender.clone();
        let delay = self.config.commit_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sender.send(Message::DelayedCommit).await;
        });
    }

    fn drain_waiters(&mut self, err: impl Fn() -> Error) {
        for (reply, _) in self.waiters.drain(..) {
            let _ = reply.send(Err(err()));
        }
    }
}
