//! The background updater: walks the database's change
//! stream from the group's current sequence, diffs each document's prior
//! emissions (kept in the id-btree) against freshly computed ones, and
//! drives `tree::add_remove` per touched index. Reports progress back to
//! the coordinator on a documents/time cadence and hands the file back on
//! exit (normal or crashed).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::GroupConfig;
use crate::db::{Change, ChangeStream, Database, SpatialFunction};
use crate::def::GroupDef;
use crate::error::Result;
use crate::file::AppendFile;
use crate::header::Header;
use crate::idbtree::{Emission, IdBTree};
use crate::mbr::Mbr;
use crate::node::{DocId, LeafEntry};
use crate::tree;

use super::Message;

pub(super) async fn run<D, F>(
    mut file: AppendFile,
    db: Arc<D>,
    spatial_fn: Arc<F>,
    def: GroupDef,
    config: GroupConfig,
    mut group: Header,
    mut id_tree: IdBTree,
    events: mpsc::Sender<Message>,
) where
    D: Database,
    F: SpatialFunction,
{
    let target_seq = db.current_seq();
    if group.current_seq > target_seq {
        let _ = events
            .send(Message::UpdaterCrash(format!(
                "requested sequence {} exceeds database sequence {}",
                group.current_seq, target_seq
            )))
            .await;
        return;
    }

    let mut changes = db.changes_since(group.current_seq);
    let mut processed = 0u64;
    let mut checkpoint_started = Instant::now();

    loop {
        let change = match changes.next() {
            Some(c) => c,
            None => break,
        };

        if let Err(e) = apply_change(
            &mut file,
            &config,
            &def,
            spatial_fn.as_ref(),
            &mut group,
            &mut id_tree,
            &change,
        ) {
            let _ = events.send(Message::UpdaterCrash(e.to_string())).await;
            return;
        }
        group.current_seq = change.seq();
        processed += 1;

        let checkpoint_due = processed >= config.checkpoint_documents
            || checkpoint_started.elapsed() >= config.checkpoint_interval;
        if checkpoint_due {
            if let Err(e) = file.fsync() {
                let _ = events.send(Message::UpdaterCrash(e.to_string())).await;
                return;
            }
            let _ = events
                .send(Message::PartialUpdate {
                    group: group.clone(),
                    id_tree: id_tree.clone(),
                })
                .await;
            processed = 0;
            checkpoint_started = Instant::now();
        }
    }

    if let Err(e) = file.fsync() {
        let _ = events.send(Message::UpdaterCrash(e.to_string())).await;
        return;
    }
    let _ = events
        .send(Message::UpdaterFinished {
            group,
            id_tree,
            file,
        })
        .await;
}

/// Diffs one change's emissions against the id-btree's record of the
/// document's prior emissions and applies the resulting removes/adds to
/// every touched index's tree.
fn apply_change(
    file: &mut AppendFile,
    config: &GroupConfig,
    def: &GroupDef,
    spatial_fn: &dyn SpatialFunction,
    group: &mut Header,
    id_tree: &mut IdBTree,
    change: &Change,
) -> Result<()> {
    let doc_id = change.doc_id().clone();
    let prior: Vec<Emission> = id_tree.get(&doc_id).map(|s| s.to_vec()).unwrap_or_default();

    let new_emissions: Vec<Emission> = match change {
        Change::Deleted { .. } => Vec::new(),
        Change::Updated { body, .. } => {
            let mut out = Vec::new();
            for (index_num, source_body) in def.bodies.iter().enumerate() {
                for mbr in spatial_fn.emit(source_body, body) {
                    out.push(Emission {
                        index_num: index_num as u32,
                        mbr,
                    });
                }
            }
            out
        }
    };

    for index_num in 0..def.num_indices() {
        let removes: Vec<(DocId, Mbr)> = prior
            .iter()
            .filter(|e| e.index_num as usize == index_num)
            .map(|e| (doc_id.clone(), e.mbr))
            .collect();
        let adds: Vec<LeafEntry> = new_emissions
            .iter()
            .filter(|e| e.index_num as usize == index_num)
            .map(|e| LeafEntry {
                mbr: e.mbr,
                doc_id: doc_id.clone(),
            })
            .collect();
        if removes.is_empty() && adds.is_empty() {
            continue;
        }
        let new_root = tree::add_remove(file, &config.tree, group.roots[index_num], &removes, &adds)?;
        group.roots[index_num] = new_root;
    }

    id_tree.set(doc_id, new_emissions);
    Ok(())
}
