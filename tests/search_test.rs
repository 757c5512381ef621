mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use anamnesis::config::{AnamnesisConfig, SearchConfig, SearchWeights};
use anamnesis::embedding::Providers;
use anamnesis::Manager;
use anamnesis::memory::associations::{create_association, neighbors};
use anamnesis::memory::query::QueryBuilder;
use anamnesis::memory::search::{QueryVector, SearchQuery, SearchSource, Searcher};
use anamnesis::memory::store::{create_memory, forget_memory, update_embedding};
use anamnesis::memory::types::{MemoryType, NewAssociation, NewMemory, RelationType};
use helpers::{
    backdate, set_importance, stub_providers, test_db, test_embedding, test_manager, StubChat, StubEmbedder, TEST_MODEL,
};

fn searcher(vector: f64, keyword: f64, graph: f64, recency: f64) -> Searcher {
    Searcher::new(SearchConfig {
        weights: SearchWeights {
            vector,
            keyword,
            graph,
            recency,
        },
        ..SearchConfig::default()
    })
}

#[test]
fn graph_search_reaches_direct_neighbors() {
    let conn = test_db();
    let a = create_memory(&conn, NewMemory::new("Planning a trip to Kyoto", MemoryType::Goal)).unwrap();
    let b = create_memory(&conn, NewMemory::new("Booked a ryokan for April", MemoryType::Event)).unwrap();
    create_memory(&conn, NewMemory::new("Unrelated grocery list", MemoryType::Todo)).unwrap();
    create_association(&conn, NewAssociation::new(&a.uid, RelationType::RelatedTo, &b.uid)).unwrap();

    let reached = neighbors(&conn, &a.uid, 1).unwrap();
    assert_eq!(reached.len(), 1);
    assert_eq!(reached[0].uid, b.uid);
    assert_eq!(reached[0].depth, 1);

    let response = searcher(0.0, 0.0, 1.0, 0.0)
        .search(&conn, &SearchQuery::new("trip").context(&a.uid), None)
        .unwrap();
    let uids: Vec<&str> = response.results.iter().map(|r| r.memory.uid.as_str()).collect();
    assert_eq!(uids, vec![b.uid.as_str()]);
    assert!(response.results[0].sources.contains_key(&SearchSource::Graph));
}

#[test]
fn keyword_only_works_without_embeddings() {
    let conn = test_db();
    let hit = create_memory(&conn, NewMemory::new("Drinks oat milk flat whites", MemoryType::Preference)).unwrap();
    create_memory(&conn, NewMemory::new("Runs every Tuesday evening", MemoryType::Routine)).unwrap();

    let response = searcher(0.0, 1.0, 0.0, 0.0)
        .search(&conn, &SearchQuery::new("oat milk"), None)
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.uid, hit.uid);
    assert_eq!(response.results[0].rank, 1);
    assert!(response.degraded.is_empty());
}

#[test]
fn vector_search_ranks_by_similarity() {
    let conn = test_db();
    let near = create_memory(&conn, NewMemory::new("alpha", MemoryType::Fact)).unwrap();
    let far = create_memory(&conn, NewMemory::new("beta", MemoryType::Fact)).unwrap();
    update_embedding(&conn, &near.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &far.uid, &test_embedding(1), TEST_MODEL).unwrap();

    let query = test_embedding(0);
    let response = searcher(1.0, 0.0, 0.0, 0.0)
        .search(
            &conn,
            &SearchQuery::new("anything"),
            Some(QueryVector {
                embedding: &query,
                model: TEST_MODEL,
            }),
        )
        .unwrap();
    assert_eq!(response.results[0].memory.uid, near.uid);
    let score = response.results[0].sources[&SearchSource::Vector];
    assert!((score - 1.0).abs() < 1e-6);
}

#[test]
fn vectors_from_other_models_are_ignored() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("gamma", MemoryType::Fact)).unwrap();
    update_embedding(&conn, &m.uid, &test_embedding(0), "some-other-model").unwrap();

    let query = test_embedding(0);
    let response = searcher(1.0, 0.0, 0.0, 0.0)
        .search(
            &conn,
            &SearchQuery::new("anything"),
            Some(QueryVector {
                embedding: &query,
                model: TEST_MODEL,
            }),
        )
        .unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn agreement_across_sources_wins() {
    let conn = test_db();
    let both = create_memory(&conn, NewMemory::new("sourdough starter feeding", MemoryType::Routine)).unwrap();
    let kw_only = create_memory(&conn, NewMemory::new("sourdough recipe card", MemoryType::Fact)).unwrap();
    let vec_only = create_memory(&conn, NewMemory::new("bread flour brand", MemoryType::Fact)).unwrap();
    update_embedding(&conn, &both.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &vec_only.uid, &test_embedding(0), TEST_MODEL).unwrap();
    update_embedding(&conn, &kw_only.uid, &test_embedding(5), TEST_MODEL).unwrap();

    let query = test_embedding(0);
    let response = searcher(0.5, 0.5, 0.0, 0.0)
        .search(
            &conn,
            &SearchQuery::new("sourdough"),
            Some(QueryVector {
                embedding: &query,
                model: TEST_MODEL,
            }),
        )
        .unwrap();
    assert_eq!(response.results[0].memory.uid, both.uid);
    let sources = &response.results[0].sources;
    assert!(sources.contains_key(&SearchSource::Vector));
    assert!(sources.contains_key(&SearchSource::Keyword));
    let scores: Vec<f64> = response.results.iter().map(|r| r.score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn filters_apply_to_every_source_and_forgotten_is_excluded() {
    let conn = test_db();
    let alice = create_memory(
        &conn,
        NewMemory::new("likes hiking trails", MemoryType::Preference).with_username("alice"),
    )
    .unwrap();
    create_memory(
        &conn,
        NewMemory::new("likes hiking boots", MemoryType::Preference).with_username("bob"),
    )
    .unwrap();
    let gone = create_memory(
        &conn,
        NewMemory::new("likes hiking maps", MemoryType::Preference).with_username("alice"),
    )
    .unwrap();
    forget_memory(&conn, &gone.uid).unwrap();

    let response = Searcher::new(SearchConfig::default())
        .search(
            &conn,
            &SearchQuery::new("hiking").with_filter(QueryBuilder::new().username("alice")),
            None,
        )
        .unwrap();
    let uids: Vec<&str> = response.results.iter().map(|r| r.memory.uid.as_str()).collect();
    assert_eq!(uids, vec![alice.uid.as_str()]);
}

#[test]
fn empty_text_is_a_filter_listing() {
    let conn = test_db();
    for i in 0..3 {
        create_memory(&conn, NewMemory::new(format!("todo {i}"), MemoryType::Todo)).unwrap();
    }
    create_memory(&conn, NewMemory::new("a fact", MemoryType::Fact)).unwrap();

    let query = SearchQuery {
        text: Some("   ".into()),
        filter: QueryBuilder::new().memory_type(MemoryType::Todo),
        max_results: Some(2),
        context_uid: None,
    };
    let response = Searcher::new(SearchConfig::default()).search(&conn, &query, None).unwrap();
    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|r| r.score == 0.0));
    assert!(response.results.iter().all(|r| r.memory.memory_type == MemoryType::Todo));
}

#[test]
fn fts_syntax_in_query_text_is_harmless() {
    let conn = test_db();
    create_memory(&conn, NewMemory::new("meeting notes", MemoryType::Fact)).unwrap();
    let response = searcher(0.0, 1.0, 0.0, 0.0)
        .search(&conn, &SearchQuery::new("\"meeting AND (notes* OR"), None)
        .unwrap();
    assert!(response.degraded.is_empty());
    assert_eq!(response.results.len(), 1);
}

#[tokio::test]
async fn manager_search_embeds_query_and_touches_results() {
    let manager = test_manager(stub_providers(Arc::new(StubChat::new("[]"))));
    let target = manager
        .create_memory(NewMemory::new("walks the dog at dawn", MemoryType::Routine))
        .await
        .unwrap();
    manager
        .create_memory(NewMemory::new("quarterly tax filing", MemoryType::Todo))
        .await
        .unwrap();

    let response = manager
        .search(SearchQuery::new("dog walks").max_results(1))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.uid, target.uid);
    assert!(response.results[0].sources.contains_key(&SearchSource::Vector));

    let touched = manager.get_memory(&target.uid).await.unwrap().unwrap();
    assert_eq!(touched.access_count, 1);
    assert!(touched.last_accessed_at.is_some());
}

#[test]
fn recency_ranks_by_full_score_not_last_activity() {
    let conn = test_db();
    let important = create_memory(&conn, NewMemory::new("Married in June", MemoryType::Event)).unwrap();
    set_importance(&conn, &important.uid, 1.0);
    backdate(&conn, &important.uid, 1);
    for i in 0..8 {
        let trivia = create_memory(&conn, NewMemory::new(format!("fresh trivia {i}"), MemoryType::Observation)).unwrap();
        set_importance(&conn, &trivia.uid, 0.0);
    }

    let response = searcher(0.0, 0.0, 0.0, 1.0)
        .search(&conn, &SearchQuery::new("anything").max_results(1), None)
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.uid, important.uid);
    let score = response.results[0].sources[&SearchSource::Recency];
    assert!((score - (-0.1f64).exp()).abs() < 1e-3);
}

#[test]
fn failed_source_is_reported_as_degraded() {
    let conn = test_db();
    let m = create_memory(&conn, NewMemory::new("likes hiking trails", MemoryType::Preference)).unwrap();
    conn.execute_batch(
        "DROP TRIGGER memories_fts_insert;
         DROP TRIGGER memories_fts_delete;
         DROP TRIGGER memories_fts_update;
         DROP TABLE memories_fts;",
    )
    .unwrap();

    let response = searcher(0.0, 0.5, 0.0, 0.5)
        .search(&conn, &SearchQuery::new("hiking"), None)
        .unwrap();
    assert_eq!(response.degraded, vec![SearchSource::Keyword]);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].memory.uid, m.uid);
    assert!(response.results[0].sources.contains_key(&SearchSource::Recency));
}

#[tokio::test]
async fn zero_vector_weight_skips_query_embedding() {
    let embedder = Arc::new(StubEmbedder::new(TEST_MODEL));
    let mut config = AnamnesisConfig::default();
    config.search.weights.vector = 0.0;
    let manager = Manager::new(
        test_db(),
        config,
        Providers {
            embedder: embedder.clone(),
            chat: None,
        },
    );
    manager
        .create_memory(NewMemory::new("grows tomatoes on the balcony", MemoryType::Fact))
        .await
        .unwrap();
    let before = embedder.calls.load(Ordering::SeqCst);

    let response = manager.search(SearchQuery::new("tomatoes")).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before);
}
