use std::sync::{Arc, Mutex};

use super::*;
use crate::document::DEFAULT_FUTURE_TOLERANCE_MICROS;
use crate::test_utils::{keypair, setup_storage, signed_doc, signed_doc_in, WORKSPACE};

fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut result = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            result.push(tail);
        }
    }
    result
}

#[tokio::test]
async fn test_open_rejects_invalid_workspace() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let result = Storage::open(&temp_dir.path().join("test.db"), "garden").await;
    assert!(matches!(result, Err(StorageError::InvalidWorkspace(_))));
}

#[tokio::test]
async fn test_set_and_get_latest() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    assert!(storage.set(&suzy, SetRequest::new("greeting", "hello")).await.unwrap());

    let doc = storage.get_latest("greeting").await.unwrap().unwrap();
    assert_eq!(doc.value, "hello");
    assert_eq!(doc.author, suzy.address);
    assert_eq!(doc.workspace, WORKSPACE);
    assert_eq!(doc.schema_version, "kv.1");
    assert_eq!(
        storage.get_value("greeting").await.unwrap().as_deref(),
        Some("hello")
    );
    assert!(storage.get_latest("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let (storage, _temp) = setup_storage().await;
    let doc = signed_doc(&keypair("suzy"), "x", "v", 100);

    assert!(storage.ingest(&doc, None).await.unwrap());
    assert!(!storage.ingest(&doc, None).await.unwrap());

    let all = storage.query(&Query::history()).await.unwrap();
    assert_eq!(all, vec![doc]);
}

#[tokio::test]
async fn test_ingest_order_does_not_matter() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    let docs = vec![
        signed_doc(&suzy, "x", "first", 10),
        signed_doc(&suzy, "x", "third", 30),
        signed_doc(&suzy, "x", "second", 20),
        signed_doc(&suzy, "x", "third-again", 30),
    ];
    let expected = docs
        .iter()
        .max_by(|a, b| a.cmp_recency(b))
        .cloned()
        .unwrap();

    for permutation in permutations(&docs) {
        sqlx::query("DELETE FROM documents")
            .execute(storage.pool())
            .await
            .unwrap();

        for doc in &permutation {
            storage.ingest(doc, None).await.unwrap();
        }

        let stored = storage.query(&Query::history()).await.unwrap();
        assert_eq!(stored, vec![expected.clone()]);
    }
}

#[tokio::test]
async fn test_older_document_is_rejected() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    assert!(storage.ingest(&signed_doc(&suzy, "x", "new", 200), None).await.unwrap());
    assert!(!storage.ingest(&signed_doc(&suzy, "x", "old", 100), None).await.unwrap());

    assert_eq!(storage.get_value("x").await.unwrap().as_deref(), Some("new"));
}

#[tokio::test]
async fn test_one_row_per_author_and_single_winner() {
    let (storage, _temp) = setup_storage().await;

    let docs = vec![
        signed_doc(&keypair("suzy"), "x", "suzy", 100),
        signed_doc(&keypair("bobo"), "x", "bobo", 300),
        signed_doc(&keypair("carl"), "x", "carl", 200),
    ];
    for doc in &docs {
        assert!(storage.ingest(doc, None).await.unwrap());
    }

    let history = storage.query(&Query::history()).await.unwrap();
    assert_eq!(history.len(), 3);
    let timestamps: Vec<i64> = history.iter().map(|d| d.timestamp).collect();
    assert_eq!(timestamps, vec![300, 200, 100]);

    let winners = storage.query(&Query::new()).await.unwrap();
    assert_eq!(winners, vec![docs[1].clone()]);
}

#[tokio::test]
async fn test_signature_breaks_ties_between_authors() {
    let (storage, _temp) = setup_storage().await;

    let a = signed_doc(&keypair("suzy"), "x", "suzy", 100);
    let b = signed_doc(&keypair("bobo"), "x", "bobo", 100);
    storage.ingest(&a, None).await.unwrap();
    storage.ingest(&b, None).await.unwrap();

    let expected = if a.signature > b.signature { a } else { b };
    assert_eq!(storage.get_latest("x").await.unwrap(), Some(expected));
}

#[tokio::test]
async fn test_future_cutoff_boundary() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    let at_cutoff = signed_doc(&suzy, "at", "v", 1_000);
    let past_cutoff = signed_doc(&suzy, "past", "v", 1_001);

    assert!(storage.ingest(&at_cutoff, Some(1_000)).await.unwrap());
    assert!(!storage.ingest(&past_cutoff, Some(1_000)).await.unwrap());
}

#[tokio::test]
async fn test_default_cutoff_rejects_far_future() {
    let (storage, _temp) = setup_storage().await;
    let far_future = now_micros() + 2 * DEFAULT_FUTURE_TOLERANCE_MICROS;
    let doc = signed_doc(&keypair("suzy"), "x", "v", far_future);

    assert!(!storage.ingest(&doc, None).await.unwrap());
    assert!(storage.query(&Query::history()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejects_foreign_workspace_and_bad_signature() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    let foreign = signed_doc_in("+other.xyz", &suzy, "x", "v", 100);
    assert!(!storage.ingest(&foreign, None).await.unwrap());

    let mut forged = signed_doc(&suzy, "x", "v", 100);
    forged.value = "forged".to_string();
    assert!(!storage.ingest(&forged, None).await.unwrap());

    assert!(storage.query(&Query::history()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_set_timestamps_strictly_increase() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");

    let mut previous = 0;
    for i in 0..5 {
        let request = SetRequest::new("x", format!("v{i}")).with_timestamp(1);
        assert!(storage.set(&suzy, request).await.unwrap());

        let doc = storage.get_latest("x").await.unwrap().unwrap();
        assert!(doc.timestamp > previous);
        assert_eq!(doc.value, format!("v{i}"));
        previous = doc.timestamp;
    }
}

#[tokio::test]
async fn test_set_supersedes_winner_from_the_future() {
    let (storage, _temp) = setup_storage().await;
    let ahead = now_micros() + DEFAULT_FUTURE_TOLERANCE_MICROS / 2;
    storage
        .ingest(&signed_doc(&keypair("bobo"), "x", "bobo", ahead), None)
        .await
        .unwrap();

    let suzy = keypair("suzy");
    assert!(storage.set(&suzy, SetRequest::new("x", "suzy")).await.unwrap());

    let winner = storage.get_latest("x").await.unwrap().unwrap();
    assert_eq!(winner.author, suzy.address);
    assert_eq!(winner.timestamp, ahead + 1);
}

#[tokio::test]
async fn test_set_with_mismatched_keypair_errors() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");
    let broken = crate::crypto::AuthorKeypair {
        address: suzy.address,
        secret: keypair("bobo").secret,
    };

    let result = storage.set(&broken, SetRequest::new("x", "v")).await;
    assert!(matches!(result, Err(StorageError::Signing(_))));
}

#[tokio::test]
async fn test_prefix_query() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");
    for key in ["b/1", "a/2", "a/1"] {
        storage.set(&suzy, SetRequest::new(key, key)).await.unwrap();
    }

    let keys = storage.keys(&Query::new().with_prefix("a/")).await.unwrap();
    assert_eq!(keys, vec!["a/1", "a/2"]);
}

#[tokio::test]
async fn test_prefix_is_literal_and_case_sensitive() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");
    for key in ["a%b/1", "axb/1", "a_c", "abc", "A/1", "a/1"] {
        storage.set(&suzy, SetRequest::new(key, "v")).await.unwrap();
    }

    let percent = storage.keys(&Query::new().with_prefix("a%")).await.unwrap();
    assert_eq!(percent, vec!["a%b/1"]);

    let underscore = storage.keys(&Query::new().with_prefix("a_")).await.unwrap();
    assert_eq!(underscore, vec!["a_c"]);

    let lower = storage.keys(&Query::new().with_prefix("a/")).await.unwrap();
    assert_eq!(lower, vec!["a/1"]);
}

#[tokio::test]
async fn test_key_range_is_half_open() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");
    for key in ["a", "b", "c", "d"] {
        storage.set(&suzy, SetRequest::new(key, "v")).await.unwrap();
    }

    let keys = storage
        .keys(&Query::new().with_low_key("b").with_high_key("d"))
        .await
        .unwrap();
    assert_eq!(keys, vec!["b", "c"]);

    let exact = storage.keys(&Query::new().with_key("c")).await.unwrap();
    assert_eq!(exact, vec!["c"]);
}

#[tokio::test]
async fn test_limit_counts_rows_or_keys() {
    let (storage, _temp) = setup_storage().await;
    storage.ingest(&signed_doc(&keypair("suzy"), "a", "suzy", 100), None).await.unwrap();
    storage.ingest(&signed_doc(&keypair("bobo"), "a", "bobo", 200), None).await.unwrap();
    storage.ingest(&signed_doc(&keypair("carl"), "b", "carl", 100), None).await.unwrap();

    let rows = storage.query(&Query::history().with_limit(2)).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|d| d.key == "a"));

    // keys() ignores history, so the limit counts distinct keys.
    let keys = storage.keys(&Query::history().with_limit(2)).await.unwrap();
    assert_eq!(keys, vec!["a", "b"]);

    let values = storage.values(&Query::new()).await.unwrap();
    assert_eq!(values, vec!["bobo", "carl"]);

    assert!(storage.query(&Query::new().with_limit(0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_authors_and_workspaces() {
    let (storage, _temp) = setup_storage().await;
    let suzy = keypair("suzy");
    let bobo = keypair("bobo");
    storage.set(&suzy, SetRequest::new("a", "v")).await.unwrap();
    storage.set(&bobo, SetRequest::new("b", "v")).await.unwrap();
    storage.set(&bobo, SetRequest::new("c", "v")).await.unwrap();

    let mut expected = vec![suzy.address, bobo.address];
    expected.sort();
    assert_eq!(storage.authors().await.unwrap(), expected);

    let workspaces = list_workspaces(storage.pool()).await.unwrap();
    assert_eq!(workspaces, vec![WORKSPACE]);
}

#[tokio::test]
async fn test_workspaces_share_a_pool_without_mixing() {
    let (storage, _temp) = setup_storage().await;
    let other = Storage::new(storage.pool().clone(), "+other.xyz").unwrap();
    let suzy = keypair("suzy");

    storage.set(&suzy, SetRequest::new("x", "garden")).await.unwrap();
    other.set(&suzy, SetRequest::new("x", "other")).await.unwrap();

    assert_eq!(storage.get_value("x").await.unwrap().as_deref(), Some("garden"));
    assert_eq!(other.get_value("x").await.unwrap().as_deref(), Some("other"));
}

#[tokio::test]
async fn test_has_documents_is_per_workspace() {
    let (storage, _temp) = setup_storage().await;
    let other = Storage::new(storage.pool().clone(), "+other.xyz").unwrap();
    assert!(!storage.has_documents().await.unwrap());

    other.set(&keypair("suzy"), SetRequest::new("x", "1")).await.unwrap();
    assert!(!storage.has_documents().await.unwrap());
    assert!(other.has_documents().await.unwrap());
}

#[tokio::test]
async fn test_concurrent_ingest_keeps_newest() {
    let (storage, _temp) = setup_storage().await;
    let storage = Arc::new(storage);
    let suzy = keypair("suzy");

    // Interleave timestamps so old and new documents race each other.
    let docs: Vec<Document> = (0..24)
        .map(|i| {
            let timestamp = 1_000 + ((i * 7) % 24);
            signed_doc(&suzy, "contested", &format!("v{timestamp}"), timestamp)
        })
        .collect();
    let expected = docs
        .iter()
        .max_by(|a, b| a.cmp_recency(b))
        .cloned()
        .unwrap();

    let handles: Vec<_> = docs
        .into_iter()
        .map(|doc| {
            let storage = Arc::clone(&storage);
            tokio::spawn(async move { storage.ingest(&doc, None).await.unwrap() })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = storage.query(&Query::history()).await.unwrap();
    assert_eq!(stored, vec![expected]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_across_threads() {
    let (storage, _temp) = setup_storage().await;
    let storage = Arc::new(storage);
    let suzy = keypair("suzy");

    let mut handles = Vec::new();
    for round in 0..4 {
        for timestamp in (1..=10).rev() {
            let doc = signed_doc(&suzy, "k", &format!("r{round}"), timestamp * 10 + round);
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.ingest(&doc, None).await.unwrap()
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stored = storage.get_latest("k").await.unwrap().unwrap();
    assert_eq!(stored.timestamp, 103);
    assert_eq!(stored.value, "r3");
    assert_eq!(storage.query(&Query::history()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_write_events() {
    let (storage, _temp) = setup_storage().await;
    let events: Arc<Mutex<Vec<WriteEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    let id = storage.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    let suzy = keypair("suzy");
    storage.set(&suzy, SetRequest::new("x", "one")).await.unwrap();
    storage.set(&suzy, SetRequest::new("x", "two")).await.unwrap();
    // An older document from another author is stored but does not win.
    let bobo_doc = signed_doc(&keypair("bobo"), "x", "bobo", 1);
    storage.ingest(&bobo_doc, None).await.unwrap();
    // Rejected writes produce no event.
    storage.ingest(&bobo_doc, None).await.unwrap();

    {
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(events[0].is_local && events[0].is_latest && events[0].is_first_from_author);
        assert!(events[1].is_local && events[1].is_latest && !events[1].is_first_from_author);
        assert!(!events[2].is_local && !events[2].is_latest && events[2].is_first_from_author);
        assert_eq!(events[2].document, bobo_doc);
    }

    assert!(storage.unsubscribe(id));
    assert!(!storage.unsubscribe(id));
    storage.set(&suzy, SetRequest::new("x", "three")).await.unwrap();
    assert_eq!(events.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_new_author_policy_exclude() {
    let (storage, _temp) = setup_storage().await;
    let storage = storage.with_new_author_policy(NewAuthorPolicy::Exclude);
    let events: Arc<Mutex<Vec<WriteEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    storage.subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    let suzy = keypair("suzy");
    storage.set(&suzy, SetRequest::new("x", "one")).await.unwrap();
    storage.set(&suzy, SetRequest::new("x", "two")).await.unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].document.value, "two");
    // Excluded writes are still stored.
    drop(events);
    assert_eq!(storage.get_value("x").await.unwrap().as_deref(), Some("two"));
}
