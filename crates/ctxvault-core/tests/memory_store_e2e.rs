//! End-to-end tests for the entry store: budget enforcement, durable-first
//! mutations, hydration and export/import.

use std::sync::Arc;

use chrono::{Duration, Utc};

use ctxvault_core::memory::store::{EntryOptions, EntryPatch, EntryStore, InsertOutcome, NewEntry};
use ctxvault_core::{count_tokens, TOKEN_BUDGET};
use ctxvault_state::fakes::{MemoryEntryRepository, MemoryStorageBackend};
use ctxvault_state::{
    Category, MemoryEntry, OwnerId, Scope, StorageBackend, SurrealStorageBackend,
};

fn seeded(id: &str, tokens: usize) -> MemoryEntry {
    let at = Utc::now() - Duration::days(2);
    MemoryEntry {
        id: id.into(),
        title: format!("seed {id}"),
        content: "x".repeat(8),
        category: Category::Projects,
        scope: Scope::Project,
        tags: vec!["seed".into()],
        token_count: tokens,
        created_at: at,
        updated_at: at,
        last_accessed_at: Some(at),
        access_count: 1,
        pinned: false,
        source_type: Some("template".into()),
        source_ref: None,
    }
}

fn store_over(repo: &Arc<MemoryEntryRepository>) -> EntryStore {
    EntryStore::new(OwnerId::Workspace, repo.clone())
}

#[tokio::test]
async fn test_token_count_for_seventeen_chars() {
    let repo = Arc::new(MemoryEntryRepository::new());
    let store = store_over(&repo);

    let outcome = store
        .insert(
            NewEntry::new("seventeen", "a".repeat(17), Category::Facts),
            EntryOptions::default(),
        )
        .await
        .unwrap();

    let entry = outcome.entry().unwrap();
    assert_eq!(entry.token_count, 5);
    assert_eq!(store.total_tokens().await, 5);
    assert_eq!(repo.stored()[0].token_count, 5);
}

#[tokio::test]
async fn test_full_budget_rejects_any_positive_insert() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![
        seeded("half-a", TOKEN_BUDGET / 2),
        seeded("half-b", TOKEN_BUDGET / 2),
    ]));
    let store = store_over(&repo);
    store.hydrate().await.unwrap();
    assert_eq!(store.total_tokens().await, TOKEN_BUDGET);

    let outcome = store
        .insert(
            NewEntry::new("one more", "a", Category::Facts),
            EntryOptions::default(),
        )
        .await
        .unwrap();

    match outcome {
        InsertOutcome::Rejected(rejection) => {
            assert_eq!(rejection.requested, 1);
            assert_eq!(rejection.current_total, TOKEN_BUDGET);
            assert_eq!(rejection.budget, TOKEN_BUDGET);
            assert_eq!(rejection.available(), 0);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(store.total_tokens().await, TOKEN_BUDGET);
    assert_eq!(store.len().await, 2);
    assert_eq!(repo.calls().mutations(), 0);
}

#[tokio::test]
async fn test_zero_cost_insert_fits_full_budget() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded(
        "all",
        TOKEN_BUDGET,
    )]));
    let store = store_over(&repo);

    let outcome = store
        .insert(
            NewEntry::new("title only", "", Category::Facts),
            EntryOptions::default(),
        )
        .await
        .unwrap();
    assert!(!outcome.is_rejected());
    assert_eq!(store.total_tokens().await, TOKEN_BUDGET);
}

#[tokio::test]
async fn test_insert_just_under_budget_is_accepted() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded(
        "most",
        TOKEN_BUDGET - 2,
    )]));
    let store = store_over(&repo);

    let ok = store
        .insert(
            NewEntry::new("fits", "a".repeat(8), Category::Facts),
            EntryOptions::default(),
        )
        .await
        .unwrap();
    assert!(!ok.is_rejected());
    assert_eq!(store.total_tokens().await, TOKEN_BUDGET);

    let rejected = store
        .insert(
            NewEntry::new("overflow", "a", Category::Facts),
            EntryOptions::default(),
        )
        .await
        .unwrap();
    assert!(rejected.is_rejected());
}

#[tokio::test]
async fn test_update_can_exceed_budget() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded(
        "big",
        TOKEN_BUDGET - 1,
    )]));
    let store = store_over(&repo);
    let small = store
        .insert(NewEntry::new("small", "a", Category::Facts), EntryOptions::default())
        .await
        .unwrap()
        .into_entry()
        .unwrap();

    let grown = store
        .update(&small.id, EntryPatch::default().content("a".repeat(40)))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(grown.token_count, 10);
    assert_eq!(store.total_tokens().await, TOKEN_BUDGET - 1 + 10);
}

#[tokio::test]
async fn test_each_mutation_makes_one_durable_call() {
    let repo = Arc::new(MemoryEntryRepository::new());
    let store = store_over(&repo);

    let entry = store
        .insert(
            NewEntry::new("t", "content", Category::Workflows),
            EntryOptions::default(),
        )
        .await
        .unwrap()
        .into_entry()
        .unwrap();
    assert_eq!(repo.calls().mutations(), 1);

    store
        .update(&entry.id, EntryPatch::default().title("t2"))
        .await
        .unwrap();
    assert_eq!(repo.calls().mutations(), 2);

    store.record_access(&entry.id).await.unwrap();
    assert_eq!(repo.calls().mutations(), 3);

    store.set_pinned(&entry.id, true).await.unwrap();
    assert_eq!(repo.calls().mutations(), 4);

    store.delete(&entry.id).await.unwrap();
    assert_eq!(repo.calls().mutations(), 5);

    store.clear_all().await.unwrap();
    assert_eq!(repo.calls().mutations(), 6);
}

#[tokio::test]
async fn test_hydrate_loads_once() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded("a", 3)]));
    let store = store_over(&repo);

    store.hydrate().await.unwrap();
    store.hydrate().await.unwrap();

    assert_eq!(repo.calls().get_all, 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_hydrate_loads_once() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded("a", 3)]));
    let store = Arc::new(store_over(&repo));

    let (a, b, c) = tokio::join!(store.hydrate(), store.hydrate(), store.hydrate());
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(repo.calls().get_all, 1);
}

#[tokio::test]
async fn test_first_mutation_hydrates() {
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded(
        "existing", 10,
    )]));
    let store = store_over(&repo);

    store
        .insert(NewEntry::new("new", "abcd", Category::Facts), EntryOptions::default())
        .await
        .unwrap();

    assert_eq!(store.len().await, 2);
    assert_eq!(store.total_tokens().await, 11);
    store.hydrate().await.unwrap();
    assert_eq!(repo.calls().get_all, 1);
}

#[tokio::test]
async fn test_pinned_set_follows_hydrated_entries() {
    let mut pinned = seeded("p", 1);
    pinned.pinned = true;
    let repo = Arc::new(MemoryEntryRepository::with_entries(vec![
        seeded("a", 1),
        pinned,
    ]));
    let store = store_over(&repo);
    store.hydrate().await.unwrap();
    assert_eq!(store.pinned_ids().await, vec!["p".to_string()]);
}

#[tokio::test]
async fn test_export_import_round_trip() {
    let source_repo = Arc::new(MemoryEntryRepository::new());
    let source = store_over(&source_repo);
    for (i, category) in Category::ALL.iter().enumerate() {
        let opts = EntryOptions::default().pinned(i % 2 == 0);
        let entry = source
            .insert(
                NewEntry::new(format!("t{i}"), "ü".repeat(i * 3), *category)
                    .with_tags([format!("tag{i}")]),
                opts,
            )
            .await
            .unwrap()
            .into_entry()
            .unwrap();
        if i == 1 {
            source.record_access(&entry.id).await.unwrap();
        }
    }

    let exported = source.export_all().await.unwrap();

    let target_repo = Arc::new(MemoryEntryRepository::with_entries(vec![seeded(
        "to-be-replaced",
        4,
    )]));
    let target = store_over(&target_repo);
    target.import_all(exported.clone()).await.unwrap();

    assert_eq!(target.snapshot().await, exported);
    assert_eq!(target.export_all().await.unwrap(), exported);
    assert_eq!(target.pinned_ids().await.len(), 3);
    assert!(target.get("to-be-replaced").await.is_none());
}

#[tokio::test]
async fn test_json_round_trip_through_surreal() {
    let backend = SurrealStorageBackend::in_memory().await.unwrap();
    let store = EntryStore::new(OwnerId::agent("planner"), backend.repository(&OwnerId::agent("planner")));
    store
        .insert(
            NewEntry::new("decision", "use surrealkv locally", Category::Decisions)
                .with_scope(Scope::Team),
            EntryOptions::default().source("manual", Some("adr-7".into())),
        )
        .await
        .unwrap();
    store
        .insert(
            NewEntry::new("workflow", "run the sweep hourly", Category::Workflows),
            EntryOptions::default().pinned(true),
        )
        .await
        .unwrap();

    let json = store.export_json().await.unwrap();

    let fake = MemoryStorageBackend::new();
    let copy = EntryStore::new(OwnerId::Workspace, fake.repository(&OwnerId::Workspace));
    copy.import_json(&json).await.unwrap();

    assert_eq!(copy.snapshot().await, store.export_all().await.unwrap());
    assert_eq!(copy.export_json().await.unwrap(), json);
}

#[tokio::test]
async fn test_tokens_match_content_after_updates() {
    let repo = Arc::new(MemoryEntryRepository::new());
    let store = store_over(&repo);
    let entry = store
        .insert(NewEntry::new("t", "short", Category::Facts), EntryOptions::default())
        .await
        .unwrap()
        .into_entry()
        .unwrap();

    for content in ["", "abc", "a much longer body of text", "✓✓✓✓✓"] {
        let updated = store
            .update(&entry.id, EntryPatch::default().content(content))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.token_count, count_tokens(content));
        assert_eq!(repo.stored()[0].token_count, count_tokens(content));
    }
}
