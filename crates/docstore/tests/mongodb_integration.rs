//! Integration tests against a live MongoDB server.
//!
//! These tests require a MongoDB instance to be running.
//! Set MONGODB_URL to point at it and run with `--ignored`.

use bson::{bson, doc};
use docstore::{connect, DocumentStore, SaveOutcome};

fn mongodb_url() -> String {
    std::env::var("MONGODB_URL")
        .unwrap_or_else(|_| "mongodb://localhost:27017/docstore_test".to_string())
}

async fn fresh_store(collection: &str) -> DocumentStore {
    let store = connect(&mongodb_url()).unwrap().await.unwrap();
    store
        .remove_multiple(collection, doc! {})
        .unwrap()
        .await
        .unwrap();
    store
}

#[tokio::test]
#[ignore] // Only run with --ignored flag when database is available
async fn test_connect_and_find_empty() {
    let store = fresh_store("docstore_empty").await;

    let docs = store
        .find("docstore_empty", doc! {}, None)
        .unwrap()
        .await
        .unwrap();
    assert!(docs.is_empty());

    let doc = store
        .find_one("docstore_empty", doc! {}, None)
        .unwrap()
        .await
        .unwrap();
    assert!(doc.is_none());
}

#[tokio::test]
#[ignore]
async fn test_unreachable_host_fails_asynchronously() {
    let pending = connect(
        "mongodb://127.0.0.1:1/docstore_test?serverSelectionTimeoutMS=200&connectTimeoutMS=200",
    )
    .expect("descriptor is well formed");

    let err = pending.await.unwrap_err();
    assert!(!err.is_invalid_argument());
    assert!(err.mongodb_error().is_some());
}

#[tokio::test]
#[ignore]
async fn test_insert_find_count_distinct() {
    let store = fresh_store("docstore_books").await;

    let inserted = store
        .insert(
            "docstore_books",
            bson!([
                { "title": "Harry Potter", "lang": "en" },
                { "title": "47 Ronin", "lang": "en" },
                { "title": "Le Petit Prince", "lang": "fr" },
            ]),
        )
        .unwrap()
        .await
        .unwrap();
    assert_eq!(inserted.len(), 3);
    assert!(inserted.iter().all(|d| d.get_object_id("_id").is_ok()));

    let english = store
        .find(
            "docstore_books",
            doc! { "lang": "en" },
            Some(bson!({ "fields": { "title": 1, "_id": 0 }, "sort": { "title": 1 } })),
        )
        .unwrap()
        .await
        .unwrap();
    assert_eq!(
        english,
        vec![doc! { "title": "47 Ronin" }, doc! { "title": "Harry Potter" }]
    );

    let count = store
        .count("docstore_books", doc! {}, None)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(count, 3);

    let mut langs = store
        .distinct("docstore_books", "lang", doc! {})
        .unwrap()
        .await
        .unwrap();
    langs.sort_by_key(|v| v.to_string());
    assert_eq!(langs, vec![bson!("en"), bson!("fr")]);

    let grouped = store
        .aggregate(
            "docstore_books",
            bson!([
                { "$group": { "_id": "$lang", "n": { "$sum": 1 } } },
                { "$sort": { "_id": 1 } },
            ]),
        )
        .unwrap()
        .await
        .unwrap();
    assert_eq!(grouped[0], doc! { "_id": "en", "n": 2 });
}

#[tokio::test]
#[ignore]
async fn test_save_family() {
    let store = fresh_store("docstore_saves").await;

    let outcome = store
        .save("docstore_saves", doc! { "title": "Dracula" })
        .unwrap()
        .await
        .unwrap();
    let document = match outcome {
        SaveOutcome::Inserted { document } => document,
        other => panic!("expected an insert, got {:?}", other),
    };

    let unchanged = store
        .save("docstore_saves", document.clone())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(unchanged, SaveOutcome::Modified { count: 0 });

    let mut renamed = document.clone();
    renamed.insert("title", "Dra-cool-la");
    let returned = store
        .save_complete("docstore_saves", renamed.clone())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(returned, renamed);

    let id = document.get_object_id("_id").unwrap();
    let modified = store
        .save_updates("docstore_saves", doc! { "_id": id, "year": 1897 })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let stored = store
        .find_one("docstore_saves", doc! { "_id": id }, None)
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, doc! { "_id": id, "title": "Dra-cool-la", "year": 1897 });
}

#[tokio::test]
#[ignore]
async fn test_updates_and_removes() {
    let store = fresh_store("docstore_updates").await;

    store
        .insert(
            "docstore_updates",
            bson!([{ "lang": "en" }, { "lang": "en" }, { "lang": "fr" }]),
        )
        .unwrap()
        .await
        .unwrap();

    let modified = store
        .multi_update("docstore_updates", doc! { "lang": "en" }, doc! { "checked": true })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let modified = store
        .update(
            "docstore_updates",
            doc! { "lang": "fr" },
            doc! { "$set": { "checked": true } },
            Some(bson!({ "w": 1 })),
        )
        .unwrap()
        .await
        .unwrap();
    assert_eq!(modified, 1);

    let first = store
        .find_one("docstore_updates", doc! { "lang": "fr" }, None)
        .unwrap()
        .await
        .unwrap()
        .unwrap();
    let removed = store
        .remove_single("docstore_updates", first.clone())
        .unwrap()
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let removed = store
        .remove_single("docstore_updates", first)
        .unwrap()
        .await
        .unwrap();
    assert_eq!(removed, 0);

    let removed = store
        .remove_multiple("docstore_updates", doc! { "checked": true })
        .unwrap()
        .await
        .unwrap();
    assert_eq!(removed, 2);
}
