mod helpers;

use helpers::{similar_embedding, test_embedding, test_record, test_store};
use mnemo::store::hybrid::{hybrid_search, HybridOptions};
use mnemo::store::{Filter, Record, Source};

#[test]
fn fused_results_rank_double_leg_hits_first() {
    let store = test_store();

    // "deploy pipeline" matches the query both semantically (similar vector)
    // and lexically; the others match on only one leg.
    let base = test_embedding(10);
    let mut on_both = Record::new(
        "how to run the deploy pipeline",
        similar_embedding(&base),
        Source::Knowledge,
    );
    on_both.id = "both".into();
    let mut vector_only = Record::new(
        "release procedure for services",
        similar_embedding(&base),
        Source::Knowledge,
    );
    vector_only.id = "vector-only".into();
    let mut fts_only = Record::new(
        "the deploy pipeline failed on Friday",
        test_embedding(200),
        Source::Knowledge,
    );
    fts_only.id = "fts-only".into();

    store.upsert(&on_both).unwrap();
    store.upsert(&vector_only).unwrap();
    store.upsert(&fts_only).unwrap();

    let hits = hybrid_search(
        &store,
        "deploy pipeline",
        &base,
        &HybridOptions::default().with_top_k(10),
    )
    .unwrap();

    assert_eq!(hits[0].id, "both");
    assert!(hits[0].vector_score.is_some());
    assert!(hits[0].fts_score.is_some());
    assert_eq!(hits[0].fused_rank, Some(1));
}

#[test]
fn semantic_only_ignores_keyword_matches() {
    let store = test_store();

    let base = test_embedding(5);
    let mut near = test_record("completely different words here", 0);
    near.embedding = similar_embedding(&base);
    near.id = "near".into();
    let mut keyword = test_record("exact query text match", 100);
    keyword.id = "keyword".into();

    store.upsert(&near).unwrap();
    store.upsert(&keyword).unwrap();

    let hits = hybrid_search(
        &store,
        "exact query text match",
        &base,
        &HybridOptions::default().semantic_only(),
    )
    .unwrap();

    assert_eq!(hits[0].id, "near");
    assert!(hits.iter().all(|h| h.fts_score.is_none()));
}

#[test]
fn lexical_only_ignores_vector_neighbors() {
    let store = test_store();

    let base = test_embedding(5);
    let mut near = test_record("unrelated content entirely", 0);
    near.embedding = similar_embedding(&base);
    near.id = "near".into();
    let mut keyword = test_record("rust ownership rules explained", 100);
    keyword.id = "keyword".into();

    store.upsert(&near).unwrap();
    store.upsert(&keyword).unwrap();

    let hits = hybrid_search(
        &store,
        "rust ownership",
        &base,
        &HybridOptions::default().lexical_only(),
    )
    .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "keyword");
}

#[test]
fn filter_applies_to_both_legs() {
    let store = test_store();

    let mut in_project = test_record("shared topic text", 1);
    in_project.id = "in".into();
    in_project.metadata.project_path = Some("/proj/a".into());
    let mut out_of_project = test_record("shared topic text again", 2);
    out_of_project.id = "out".into();
    out_of_project.metadata.project_path = Some("/proj/b".into());

    store.upsert(&in_project).unwrap();
    store.upsert(&out_of_project).unwrap();

    let filter = Filter {
        project_path: Some("/proj/a".into()),
        ..Filter::default()
    };
    let hits = hybrid_search(
        &store,
        "shared topic",
        &test_embedding(1),
        &HybridOptions::default().with_filter(filter),
    )
    .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "in");
}

#[test]
fn top_k_truncates_after_fusion() {
    let store = test_store();
    for i in 0..10u8 {
        let mut r = test_record(&format!("memory number {i} about searching"), i);
        r.id = format!("m{i}");
        store.upsert(&r).unwrap();
    }

    let hits = hybrid_search(
        &store,
        "memory about searching",
        &test_embedding(3),
        &HybridOptions::default().with_top_k(3),
    )
    .unwrap();

    assert_eq!(hits.len(), 3);
}
