use hoopla_core::fusion::{normalize, rrf_fusion, rrf_score, weighted_fusion};
use hoopla_core::vector::cosine_similarity;
use hoopla_core::{DocId, ScoredDoc};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn vector(len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, len)
}

fn ranking() -> impl Strategy<Value = Vec<ScoredDoc>> {
    prop::collection::btree_set(0u32..40, 0..12).prop_map(|ids| {
        let n = ids.len() as f64;
        ids.into_iter().enumerate().map(|(i, id)| ScoredDoc::new(id, n - i as f64)).collect()
    })
}

proptest! {
    #[test]
    fn cosine_is_symmetric_and_bounded((a, b) in (1usize..16).prop_flat_map(|n| (vector(n), vector(n)))) {
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        prop_assert_eq!(ab, ba);
        prop_assert!((-1.0..=1.0).contains(&ab));
    }

    #[test]
    fn normalized_scores_stay_in_unit_range(scores in prop::collection::vec(-1e6f64..1e6, 1..30)) {
        let n = normalize(&scores);
        prop_assert_eq!(n.len(), scores.len());
        prop_assert!(n.iter().all(|v| (0.0..=1.0).contains(v)));
        prop_assert!(n.iter().any(|v| *v == 1.0));
    }

    #[test]
    fn rrf_contribution_decreases_with_rank(rank in 1usize..10_000, k in 0.0f64..1000.0) {
        prop_assert!(rrf_score(rank, k) > rrf_score(rank + 1, k));
    }

    #[test]
    fn fused_list_is_the_union_in_strict_order(bm25 in ranking(), semantic in ranking()) {
        let union: BTreeSet<DocId> = bm25.iter().chain(&semantic).map(|d| d.doc_id).collect();
        for fused in [
            rrf_fusion(&bm25, &semantic, 60.0, usize::MAX).unwrap(),
            weighted_fusion(&bm25, &semantic, 0.5, usize::MAX).unwrap(),
        ] {
            let ids: BTreeSet<DocId> = fused.iter().map(|h| h.doc_id).collect();
            prop_assert_eq!(&ids, &union);
            for w in fused.windows(2) {
                prop_assert!(w[0].score > w[1].score || (w[0].score == w[1].score && w[0].doc_id < w[1].doc_id));
            }
        }
    }
}
