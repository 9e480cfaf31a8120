//! Tree engine: lookup, insert, delete, split and the `add_remove` entry
//! point the updater drives. Copy-on-write over the append-only file:
//! every mutation rewrites the root-to-leaf path as new records rather
//! than touching anything in place.
//!
//! Choose-subtree picks the child needing minimum MBR expansion; overflow
//! triggers a 4-way partition split with no B-tree analog — new code, with
//! its own tie-break rules, covered separately below.

use crate::config::TreeConfig;
use crate::error::Result;
use crate::file::AppendFile;
use crate::mbr::Mbr;
use crate::node::{DocId, LeafEntry, Node, Offset};

/// Outcome of inserting into a subtree: either it absorbed the entry and
/// was rewritten in place (new offset, same position in the parent), or it
/// overflowed and was split into two siblings.
enum InsertResult {
    Done { mbr: Mbr, offset: Offset },
    Split {
        mbr1: Mbr,
        offset1: Offset,
        mbr2: Mbr,
        offset2: Offset,
    },
}

/// Outcome of deleting from a subtree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeleteOutcome {
    Updated(Offset),
    Empty,
    NotFound,
}

/// Recursively descend the tree, pruning subtrees whose MBR is disjoint
/// from `query`.
pub fn lookup(
    file: &mut AppendFile,
    root: Option<Offset>,
    query: &Mbr,
) -> Result<Vec<LeafEntry>> {
    let mut out = Vec::new();
    if let Some(root_off) = root {
        let root_node = file.get_node(root_off)?;
        if !root_node.mbr().disjoint(query) {
            lookup_in_node(file, &root_node, query, &mut out)?;
        }
    }
    Ok(out)
}

fn lookup_in_node(
    file: &mut AppendFile,
    node: &Node,
    query: &Mbr,
    out: &mut Vec<LeafEntry>,
) -> Result<()> {
    match node {
        Node::Leaf { entries, .. } => {
            for entry in entries {
                if !entry.mbr.disjoint(query) {
                    out.push(entry.clone());
                }
            }
        }
        Node::Inner { children, .. } => {
            for child_off in children {
                let child = file.get_node(*child_off)?;
                if !child.mbr().disjoint(query) {
                    lookup_in_node(file, &child, query, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Inserts `entry` into the tree rooted at `root`, returning the new root
/// offset. Handles the nil-root base case and root promotion on split.
pub fn insert(
    file: &mut AppendFile,
    cfg: &TreeConfig,
    root: Option<Offset>,
    entry: LeafEntry,
) -> Result<Offset> {
    let root_off = match root {
        None => {
            let node = Node::Leaf {
                mbr: entry.mbr,
                entries: vec![entry],
            };
            return file.append(&node.encode());
        }
        Some(off) => off,
    };

    match insert_into(file, cfg, root_off, &entry)? {
        InsertResult::Done { offset, .. } => Ok(offset),
        InsertResult::Split {
            mbr1,
            offset1,
            mbr2,
            offset2,
        } => {
            let merged = mbr1.merge(&mbr2);
            let new_root = Node::Inner {
                mbr: merged,
                children: vec![offset1, offset2],
            };
            file.append(&new_root.encode())
        }
    }
}

fn insert_into(
    file: &mut AppendFile,
    cfg: &TreeConfig,
    node_off: Offset,
    entry: &LeafEntry,
) -> Result<InsertResult> {
    let node = file.get_node(node_off)?;
    match node {
        Node::Leaf { mbr, mut entries } => {
            entries.push(entry.clone());
            if entries.len() <= cfg.max_filled {
                let merged = mbr.merge(&entry.mbr);
                let offset = file.append(&Node::Leaf { mbr: merged, entries }.encode())?;
                Ok(InsertResult::Done { mbr: merged, offset })
            } else {
                let items: Vec<(Mbr, LeafEntry)> =
                    entries.into_iter().map(|e| (e.mbr, e)).collect();
                let ((mbr1, group1), (mbr2, group2)) = split_items(items);
                let offset1 = file.append(
                    &Node::Leaf {
                        mbr: mbr1,
                        entries: group1,
                    }
                    .encode(),
                )?;
                let offset2 = file.append(
                    &Node::Leaf {
                        mbr: mbr2,
                        entries: group2,
                    }
                    .encode(),
                )?;
                Ok(InsertResult::Split {
                    mbr1,
                    offset1,
                    mbr2,
                    offset2,
                })
            }
        }
        Node::Inner { children, .. } => {
            let mut child_mbrs = Vec::with_capacity(children.len());
            for c in &children {
                child_mbrs.push(*file.get_node(*c)?.mbr());
            }
            let mut children = children;
            let idx = choose_subtree(&child_mbrs, &entry.mbr);

            match insert_into(file, cfg, children[idx], entry)? {
                InsertResult::Done {
                    mbr: child_mbr,
                    offset: child_off,
                } => {
                    children[idx] = child_off;
                    child_mbrs[idx] = child_mbr;
                    let merged = Mbr::merge_all(child_mbrs.iter());
                    let offset = file.append(
                        &Node::Inner {
                            mbr: merged,
                            children,
                        }
                        .encode(),
                    )?;
                    Ok(InsertResult::Done { mbr: merged, offset })
                }
                InsertResult::Split {
                    mbr1,
                    offset1,
                    mbr2,
                    offset2,
                } => {
                    children[idx] = offset1;
                    children.insert(idx + 1, offset2);
                    child_mbrs[idx] = mbr1;
                    child_mbrs.insert(idx + 1, mbr2);

                    if children.len() <= cfg.max_filled {
                        let merged = Mbr::merge_all(child_mbrs.iter());
                        let offset = file.append(
                            &Node::Inner {
                                mbr: merged,
                                children,
                            }
                            .encode(),
                        )?;
                        Ok(InsertResult::Done { mbr: merged, offset })
                    } else {
                        let items: Vec<(Mbr, Offset)> = child_mbrs
                            .into_iter()
                            .zip(children.into_iter())
                            .collect();
                        let ((mbr1, group1), (mbr2, group2)) = split_items(items);
                        let offset1 = file.append(
                            &Node::Inner {
                                mbr: mbr1,
                                children: group1,
                            }
                            .encode(),
                        )?;
                        let offset2 = file.append(
                            &Node::Inner {
                                mbr: mbr2,
                                children: group2,
                            }
                            .encode(),
                        )?;
                        Ok(InsertResult::Split {
                            mbr1,
                            offset1,
                            mbr2,
                            offset2,
                        })
                    }
                }
            }
        }
    }
}

/// Choose-subtree: minimum MBR expansion cost, ties broken by first
/// occurrence in child order.
fn choose_subtree(child_mbrs: &[Mbr], entry_mbr: &Mbr) -> usize {
    let mut best_idx = 0;
    let mut best_cost = f64::INFINITY;
    for (i, mbr) in child_mbrs.iter().enumerate() {
        let cost = mbr.expansion_to_fit(entry_mbr);
        if cost < best_cost {
            best_cost = cost;
            best_idx = i;
        }
    }
    best_idx
}

/// Deletes the entry identified by `(doc_id, doc_mbr)` from the tree rooted
/// at `root`. Returns `Empty` if the tree becomes empty, `NotFound` if the
/// entry is absent.
pub fn delete(
    file: &mut AppendFile,
    root: Offset,
    doc_id: &DocId,
    doc_mbr: &Mbr,
) -> Result<DeleteOutcome> {
    delete_from(file, root, doc_id, doc_mbr)
}

fn delete_from(
    file: &mut AppendFile,
    node_off: Offset,
    doc_id: &DocId,
    doc_mbr: &Mbr,
) -> Result<DeleteOutcome> {
    let node = file.get_node(node_off)?;
    if !doc_mbr.within(node.mbr()) {
        return Ok(DeleteOutcome::NotFound);
    }
    match node {
        Node::Leaf { mut entries, .. } => {
            match entries.iter().position(|e| &e.doc_id == doc_id) {
                None => Ok(DeleteOutcome::NotFound),
                Some(idx) => {
                    if entries.len() == 1 {
                        return Ok(DeleteOutcome::Empty);
                    }
                    entries.remove(idx);
                    let mbr = Mbr::merge_all(entries.iter().map(|e| &e.mbr));
                    let offset = file.append(&Node::Leaf { mbr, entries }.encode())?;
                    Ok(DeleteOutcome::Updated(offset))
                }
            }
        }
        Node::Inner { mut children, .. } => {
            for i in 0..children.len() {
                match delete_from(file, children[i], doc_id, doc_mbr)? {
                    DeleteOutcome::NotFound => continue,
                    DeleteOutcome::Empty => {
                        children.remove(i);
                        if children.is_empty() {
                            return Ok(DeleteOutcome::Empty);
                        }
                        return rebuild_inner(file, children);
                    }
                    DeleteOutcome::Updated(new_child_off) => {
                        children[i] = new_child_off;
                        return rebuild_inner(file, children);
                    }
                }
            }
            Ok(DeleteOutcome::NotFound)
        }
    }
}

fn rebuild_inner(file: &mut AppendFile, children: Vec<Offset>) -> Result<DeleteOutcome> {
    let mut child_mbrs = Vec::with_capacity(children.len());
    for c in &children {
        child_mbrs.push(*file.get_node(*c)?.mbr());
    }
    let mbr = Mbr::merge_all(child_mbrs.iter());
    let offset = file.append(&Node::Inner { mbr, children }.encode())?;
    Ok(DeleteOutcome::Updated(offset))
}

/// Applies a batch of removes then adds to the tree, one at a time. A
/// remove whose target is absent (`NotFound`) is a no-op —
/// the updater computes removes from its own id-btree snapshot, so by
/// construction the target should exist; treating a miss as a no-op rather
/// than aborting the whole batch keeps one stale entry from blocking
/// unrelated adds in the same batch.
pub fn add_remove(
    file: &mut AppendFile,
    cfg: &TreeConfig,
    mut root: Option<Offset>,
    removes: &[(DocId, Mbr)],
    adds: &[LeafEntry],
) -> Result<Option<Offset>> {
    for (doc_id, doc_mbr) in removes {
        root = match root {
            None => None,
            Some(r) => match delete(file, r, doc_id, doc_mbr)? {
                DeleteOutcome::Updated(off) => Some(off),
                DeleteOutcome::Empty => None,
                DeleteOutcome::NotFound => Some(r),
            },
        };
    }
    for entry in adds {
        root = Some(insert(file, cfg, root, entry.clone())?);
    }
    Ok(root)
}

/// 4-way partition plus 3-level tie-break split.
///
/// Per-axis degeneracy (one of the two buckets on that axis is empty, which
/// covers the joint-degenerate cases too, since an empty axis bucket forces
/// the other bucket on that axis to hold every item) falls back to halving
/// the full item list in original order; the resulting candidate still
/// competes in the usual balance/overlap/coverage tie-break.
fn split_items<T: Clone>(items: Vec<(Mbr, T)>) -> ((Mbr, Vec<T>), (Mbr, Vec<T>)) {
    let outer = Mbr::merge_all(items.iter().map(|(m, _)| m));
    let (w, s, e, n) = (outer.w, outer.s, outer.e, outer.n);

    let mut pw = Vec::new();
    let mut pe = Vec::new();
    let mut ps = Vec::new();
    let mut pn = Vec::new();
    for (i, (m, _)) in items.iter().enumerate() {
        if m.w - w < e - m.e {
            pw.push(i);
        } else {
            pe.push(i);
        }
        if m.s - s < n - m.n {
            ps.push(i);
        } else {
            pn.push(i);
        }
    }

    let halve = || {
        let mid = items.len() / 2;
        ((0..mid).collect::<Vec<_>>(), (mid..items.len()).collect::<Vec<_>>())
    };

    let we_degenerate = pw.is_empty() || pe.is_empty();
    let sn_degenerate = ps.is_empty() || pn.is_empty();

    let (we_lo, we_hi) = if we_degenerate {
        tracing::warn!("degenerate W/E partition in split; falling back to list-order halving");
        halve()
    } else {
        (pw, pe)
    };
    let (sn_lo, sn_hi) = if sn_degenerate {
        tracing::warn!("degenerate S/N partition in split; falling back to list-order halving");
        halve()
    } else {
        (ps, pn)
    };

    let group_mbr = |idxs: &[usize]| Mbr::merge_all(idxs.iter().map(|&i| &items[i].0));
    let we_mbr_lo = group_mbr(&we_lo);
    let we_mbr_hi = group_mbr(&we_hi);
    let sn_mbr_lo = group_mbr(&sn_lo);
    let sn_mbr_hi = group_mbr(&sn_hi);

    let max_we = we_lo.len().max(we_hi.len());
    let max_sn = sn_lo.len().max(sn_hi.len());

    let use_we = if max_we < max_sn {
        true
    } else if max_we > max_sn {
        false
    } else {
        let overlap_we = we_mbr_lo.overlap(&we_mbr_hi).area();
        let overlap_sn = sn_mbr_lo.overlap(&sn_mbr_hi).area();
        if overlap_we < overlap_sn {
            true
        } else if overlap_we > overlap_sn {
            false
        } else {
            let coverage_we = we_mbr_lo.area() + we_mbr_hi.area();
            let coverage_sn = sn_mbr_lo.area() + sn_mbr_hi.area();
            coverage_we <= coverage_sn
        }
    };

    let (lo, hi, mbr_lo, mbr_hi) = if use_we {
        (we_lo, we_hi, we_mbr_lo, we_mbr_hi)
    } else {
        (sn_lo, sn_hi, sn_mbr_lo, sn_mbr_hi)
    };

    let group1: Vec<T> = lo.iter().map(|&i| items[i].1.clone()).collect();
    let group2: Vec<T> = hi.iter().map(|&i| items[i].1.clone()).collect();
    ((mbr_lo, group1), (mbr_hi, group2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_file() -> AppendFile {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.spatial");
        std::mem::forget(dir); // keep the tempdir alive for the test's duration
        AppendFile::open(&path).unwrap()
    }

    fn entry(w: f64, s: f64, e: f64, n: f64, id: &str) -> LeafEntry {
        LeafEntry {
            mbr: Mbr::new(w, s, e, n),
            doc_id: DocId::from_str(id),
        }
    }

    #[test]
    fn e1_basic_insert_and_lookup() {
        let mut file = new_file();
        let cfg = TreeConfig::default();
        let root = insert(&mut file, &cfg, None, entry(0.0, 0.0, 10.0, 10.0, "a")).unwrap();

        let hits = lookup(&mut file, Some(root), &Mbr::new(-1.0, -1.0, 1.0, 1.0)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, DocId::from_str("a"));

        let misses = lookup(&mut file, Some(root), &Mbr::new(20.0, 20.0, 30.0, 30.0)).unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn e2_grid_of_unit_boxes() {
        let mut file = new_file();
        let cfg = TreeConfig::default();
        let mut root = None;
        for x in 0..10 {
            for y in 0..10 {
                let e = entry(
                    x as f64,
                    y as f64,
                    x as f64 + 1.0,
                    y as f64 + 1.0,
                    &format!("{}-{}", x, y),
                );
                root = Some(insert(&mut file, &cfg, root, e).unwrap());
            }
        }
        let hits = lookup(&mut file, root, &Mbr::new(2.5, 2.5, 5.5, 5.5)).unwrap();
        // x,y in {2,3,4,5} overlap the query span on both axes: 4*4 boxes.
        assert_eq!(hits.len(), 16);
    }

    #[test]
    fn e3_overflow_root_splits_into_two_leaves() {
        let mut file = new_file();
        let cfg = TreeConfig::default();
        let mut root = None;
        for i in 0..81 {
            let x = (i % 20) as f64;
            let e = entry(x, x, x + 1.0, x + 1.0, &format!("doc{}", i));
            root = Some(insert(&mut file, &cfg, root, e).unwrap());
        }
        let node = file.get_node(root.unwrap()).unwrap();
        match node {
            Node::Inner { children, .. } => {
                assert_eq!(children.len(), 2);
                let mut total = 0;
                for c in children {
                    let child = file.get_node(c).unwrap();
                    assert!(matches!(child, Node::Leaf { .. }));
                    total += child.len();
                }
                assert_eq!(total, 81);
            }
            _ => panic!("expected inner root after overflow"),
        }
    }

    #[test]
    fn e4_insert_then_delete_both() {
        let mut file = new_file();
        let cfg = TreeConfig::default();
        let root = insert(&mut file, &cfg, None, entry(0.0, 0.0, 1.0, 1.0, "a")).unwrap();
        let root = insert(&mut file, &cfg, Some(root), entry(0.0, 0.0, 1.0, 1.0, "b")).unwrap();

        let query = Mbr::new(0.0, 0.0, 1.0, 1.0);
        let outcome = delete(&mut file, root, &DocId::from_str("a"), &query).unwrap();
        let root = match outcome {
            DeleteOutcome::Updated(off) => off,
            _ => panic!("expected Updated"),
        };
        let hits = lookup(&mut file, Some(root), &query).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, DocId::from_str("b"));

        let outcome = delete(&mut file, root, &DocId::from_str("b"), &query).unwrap();
        assert_eq!(outcome, DeleteOutcome::Empty);
    }

    #[test]
    fn delete_missing_doc_is_not_found() {
        let mut file = new_file();
        let cfg = TreeConfig::default();
        let root = insert(&mut file, &cfg, None, entry(0.0, 0.0, 1.0, 1.0, "a")).unwrap();
        let outcome = delete(
            &mut file,
            root,
            &DocId::from_str("ghost"),
            &Mbr::new(0.0, 0.0, 1.0, 1.0),
        )
        .unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[test]
    fn inner_mbr_always_equals_merge_of_children() {
        let mut file = new_file();
        let cfg = TreeConfig::new(2, 4);
        let mut root = None;
        for i in 0..30 {
            let x = i as f64;
            root = Some(
                insert(
                    &mut file,
                    &cfg,
                    root,
                    entry(x, x, x + 1.0, x + 1.0, &format!("d{}", i)),
                )
                .unwrap(),
            );
        }
        assert_invariant(&mut file, root.unwrap());
    }

    fn assert_invariant(file: &mut AppendFile, offset: Offset) -> Mbr {
        let node = file.get_node(offset).unwrap();
        match node {
            Node::Leaf { mbr, entries } => {
                let computed = Mbr::merge_all(entries.iter().map(|e| &e.mbr));
                assert_eq!(mbr, computed);
                mbr
            }
            Node::Inner { mbr, children } => {
                let mut mbrs = Vec::new();
                for c in &children {
                    mbrs.push(assert_invariant(file, *c));
                }
                let computed = Mbr::merge_all(mbrs.iter());
                assert_eq!(mbr, computed);
                mbr
            }
        }
    }

    fn tagged(items: &[(Mbr, &str)]) -> Vec<(Mbr, String)> {
        items.iter().map(|(m, t)| (*m, t.to_string())).collect()
    }

    // E5: split tie-break order is overlap, then coverage, then W/E default.
    #[test]
    fn e5_split_picks_smaller_overlap_when_balance_ties() {
        let items = tagged(&[
            (Mbr::new(0.0, 0.0, 3.0, 2.0), "a"),
            (Mbr::new(2.0, 0.0, 5.0, 2.0), "b"),
            (Mbr::new(0.0, 10.0, 3.0, 12.0), "c"),
            (Mbr::new(2.0, 10.0, 5.0, 12.0), "d"),
        ]);
        // W/E buckets {a,c}/{b,d} overlap by area 12; S/N buckets {a,b}/{c,d}
        // are y-disjoint (overlap 0), so S/N must win despite an equal 2/2
        // balance split on both axes.
        let ((_, g1), (_, g2)) = split_items(items);
        let mut tags: Vec<&str> = g1.iter().chain(g2.iter()).map(|s| s.as_str()).collect();
        tags.sort();
        assert_eq!(tags, vec!["a", "b", "c", "d"]);
        let mut groups = vec![g1, g2];
        groups.sort_by_key(|g| g.iter().cloned().collect::<Vec<_>>().join(","));
        assert!(groups.contains(&vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn e5_split_falls_back_to_coverage_when_overlap_ties_at_zero() {
        let items = tagged(&[
            (Mbr::new(0.0, 0.0, 2.0, 2.0), "a"),
            (Mbr::new(3.0, 0.0, 5.0, 2.0), "b"),
            (Mbr::new(0.0, 10.0, 2.0, 12.0), "c"),
            (Mbr::new(3.0, 10.0, 5.0, 12.0), "d"),
        ]);
        // Both axes are disjoint (overlap 0/0 tie); W/E coverage is 48,
        // S/N coverage is 20, so S/N wins on total coverage.
        let ((_, g1), (_, g2)) = split_items(items);
        let mut groups = vec![g1, g2];
        groups.sort_by_key(|g| g.iter().cloned().collect::<Vec<_>>().join(","));
        assert!(groups.contains(&vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn e5_split_defaults_to_west_east_on_full_tie() {
        let items = tagged(&[
            (Mbr::new(0.0, 0.0, 2.0, 2.0), "a"),
            (Mbr::new(8.0, 0.0, 10.0, 2.0), "b"),
            (Mbr::new(0.0, 8.0, 2.0, 10.0), "c"),
            (Mbr::new(8.0, 8.0, 10.0, 10.0), "d"),
        ]);
        // Symmetric under (x, y) swap: balance, overlap and coverage all tie
        // across axes, so the W/E split must be the one produced.
        let ((_, g1), (_, g2)) = split_items(items);
        let mut groups = vec![g1, g2];
        groups.sort_by_key(|g| g.iter().cloned().collect::<Vec<_>>().join(","));
        assert!(groups.contains(&vec!["a".to_string(), "c".to_string()]));
    }
}
