//! Algebraic and tree-invariant property tests.

use proptest::prelude::*;
use tempfile::tempdir;

use vtree_spatial::config::TreeConfig;
use vtree_spatial::file::AppendFile;
use vtree_spatial::mbr::Mbr;
use vtree_spatial::node::{DocId, LeafEntry, Node, Offset};
use vtree_spatial::tree;

fn mbr_strategy() -> impl Strategy<Value = Mbr> {
    (-100.0f64..100.0, -100.0f64..100.0, 0.0f64..50.0, 0.0f64..50.0)
        .prop_map(|(w, s, dw, ds)| Mbr::new(w, s, w + dw, s + ds))
}

fn boxes_strategy(max_len: usize) -> impl Strategy<Value = Vec<(Mbr, String)>> {
    prop::collection::vec(mbr_strategy(), 1..max_len)
        .prop_map(|v| v.into_iter().enumerate().map(|(i, m)| (m, format!("doc{}", i))).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn disjoint_matches_definition(a in mbr_strategy(), b in mbr_strategy()) {
        let expected = !a.within(&b) && !b.within(&a) && !a.intersect(&b);
        prop_assert_eq!(a.disjoint(&b), expected);
    }

    #[test]
    fn within_is_reflexive_and_never_disjoint_with_self(a in mbr_strategy()) {
        prop_assert!(a.within(&a));
        prop_assert!(!a.disjoint(&a));
    }

    #[test]
    fn merge_is_commutative_associative_and_contains_both(
        a in mbr_strategy(), b in mbr_strategy(), c in mbr_strategy(),
    ) {
        let m1 = a.merge(&b);
        let m2 = b.merge(&a);
        prop_assert_eq!(m1, m2);
        prop_assert!(a.within(&m1));
        prop_assert!(b.within(&m1));

        let left = a.merge(&b).merge(&c);
        let right = a.merge(&b.merge(&c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn overlap_area_is_bounded_when_not_disjoint(a in mbr_strategy(), b in mbr_strategy()) {
        if !a.disjoint(&b) {
            let overlap_area = a.overlap(&b).area();
            prop_assert!(overlap_area <= a.area().min(b.area()) + 1e-9);
        } else {
            prop_assert_eq!(a.overlap(&b), Mbr::zero());
        }
    }
}

fn build_tree(entries: &[(Mbr, String)]) -> (AppendFile, Option<Offset>, TreeConfig) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("props.spatial");
    std::mem::forget(dir);
    let mut file = AppendFile::open(&path).unwrap();
    let cfg = TreeConfig::default();
    let mut root = None;
    for (mbr, id) in entries {
        let entry = LeafEntry {
            mbr: *mbr,
            doc_id: DocId::from_str(id),
        };
        root = Some(tree::insert(&mut file, &cfg, root, entry).unwrap());
    }
    (file, root, cfg)
}

fn assert_mbr_invariant(file: &mut AppendFile, offset: Offset) -> Mbr {
    match file.get_node(offset).unwrap() {
        Node::Leaf { mbr, entries } => {
            assert_eq!(mbr, Mbr::merge_all(entries.iter().map(|e| &e.mbr)));
            mbr
        }
        Node::Inner { mbr, children } => {
            let child_mbrs: Vec<Mbr> = children
                .iter()
                .map(|c| assert_mbr_invariant(file, *c))
                .collect();
            assert_eq!(mbr, Mbr::merge_all(child_mbrs.iter()));
            mbr
        }
    }
}

fn assert_max_filled(file: &mut AppendFile, offset: Offset, max_filled: usize) {
    match file.get_node(offset).unwrap() {
        Node::Leaf { entries, .. } => assert!(entries.len() <= max_filled),
        Node::Inner { children, .. } => {
            assert!(children.len() <= max_filled);
            for c in children {
                assert_max_filled(file, c, max_filled);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn inserted_entries_are_findable_and_mbrs_consistent(entries in boxes_strategy(60)) {
        let (mut file, root, _cfg) = build_tree(&entries);
        let root = root.unwrap();
        assert_mbr_invariant(&mut file, root);
        for (mbr, id) in &entries {
            let hits = tree::lookup(&mut file, Some(root), mbr).unwrap();
            prop_assert!(hits.iter().any(|e| e.doc_id == DocId::from_str(id)));
        }
    }

    #[test]
    fn no_node_exceeds_max_filled_after_insertion(entries in boxes_strategy(250)) {
        let (mut file, root, cfg) = build_tree(&entries);
        assert_max_filled(&mut file, root.unwrap(), cfg.max_filled);
    }

    #[test]
    fn lookup_matches_brute_force_oracle(entries in boxes_strategy(100), query in mbr_strategy()) {
        let (mut file, root, _cfg) = build_tree(&entries);
        let mut expected: Vec<DocId> = entries
            .iter()
            .filter(|(m, _)| !m.disjoint(&query))
            .map(|(_, id)| DocId::from_str(id))
            .collect();
        expected.sort();
        let mut got: Vec<DocId> = tree::lookup(&mut file, root, &query)
            .unwrap()
            .into_iter()
            .map(|e| e.doc_id)
            .collect();
        got.sort();
        prop_assert_eq!(expected, got);
    }

    #[test]
    fn insert_then_delete_restores_prior_query_results(entries in boxes_strategy(40), query in mbr_strategy()) {
        let (mut file, root, cfg) = build_tree(&entries);

        let mut before: Vec<DocId> = tree::lookup(&mut file, root, &query)
            .unwrap()
            .into_iter()
            .map(|e| e.doc_id)
            .collect();
        before.sort();

        let extra_mbr = Mbr::new(1_000.0, 1_000.0, 1_001.0, 1_001.0);
        let extra = LeafEntry {
            mbr: extra_mbr,
            doc_id: DocId::from_str("zzz-transient"),
        };
        let root_with_extra = tree::insert(&mut file, &cfg, root, extra.clone()).unwrap();
        let outcome = tree::delete(&mut file, root_with_extra, &extra.doc_id, &extra_mbr).unwrap();
        let root_after = match outcome {
            tree::DeleteOutcome::Updated(o) => Some(o),
            other => panic!("expected Updated, got {:?}", other),
        };

        let mut after: Vec<DocId> = tree::lookup(&mut file, root_after, &query)
            .unwrap()
            .into_iter()
            .map(|e| e.doc_id)
            .collect();
        after.sort();

        prop_assert_eq!(before, after);
    }
}
