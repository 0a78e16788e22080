//! Storage collaborator interface
//!
//! A `Backend` executes already-validated, already-normalized requests
//! against one collection. It owns the connection; the store only decides
//! what to ask for and how to shape the answer.

use crate::options::{Acknowledgement, ReadOptions, WriteOptions};
use crate::validation::ID_FIELD;
use crate::Result;
use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use serde::Serialize;

/// Result of `save`: either a fresh insert or a replace of an existing record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaveOutcome {
    /// No record had the document's identity; it was inserted
    Inserted { document: Document },
    /// An existing record was replaced; 0 when the content was unchanged
    Modified { count: u64 },
}

impl SaveOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, SaveOutcome::Inserted { .. })
    }

    /// The inserted document, if this was an insert
    pub fn document(&self) -> Option<&Document> {
        match self {
            SaveOutcome::Inserted { document } => Some(document),
            SaveOutcome::Modified { .. } => None,
        }
    }

    /// The modified count, if this was a replace
    pub fn modified_count(&self) -> Option<u64> {
        match self {
            SaveOutcome::Modified { count } => Some(*count),
            SaveOutcome::Inserted { .. } => None,
        }
    }
}

/// Collection-scoped document store primitives
#[async_trait]
pub trait Backend: Send + Sync {
    /// All documents matching `filter`, fully materialized
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Vec<Document>>;

    /// First document matching `filter`, if any
    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Option<Document>>;

    async fn count(&self, collection: &str, filter: Document, options: ReadOptions) -> Result<u64>;

    /// Distinct values of `field`, in the order the store returns them
    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>>;

    /// Runs `pipeline` with primary read preference
    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>>;

    /// Inserts `docs` and returns them with their identities filled in
    async fn insert(
        &self,
        collection: &str,
        docs: Vec<Document>,
        ack: Acknowledgement,
    ) -> Result<Vec<Document>>;

    /// Applies `body` (operator document or replacement) and returns the modified count
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        body: Document,
        options: WriteOptions,
    ) -> Result<u64>;

    /// Inserts `document` when it has no stored counterpart, otherwise replaces it by `_id`
    async fn save(
        &self,
        collection: &str,
        document: Document,
        ack: Acknowledgement,
    ) -> Result<SaveOutcome>;

    /// Removes matching documents (at most one when `options.multi` is false)
    async fn remove(&self, collection: &str, filter: Document, options: WriteOptions) -> Result<u64>;
}

/// Returns `doc` with a freshly generated `_id` in front when it has none
pub fn ensure_id(doc: Document) -> Document {
    if doc.contains_key(ID_FIELD) {
        return doc;
    }
    let mut identified = Document::new();
    identified.insert(ID_FIELD, ObjectId::new());
    for (key, value) in doc {
        identified.insert(key, value);
    }
    identified
}

/// True when `body` is an update-operator document (`$set`, `$inc`, ...)
pub fn is_operator_document(body: &Document) -> bool {
    body.keys().any(|key| key.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_save_outcome_accessors() {
        let inserted = SaveOutcome::Inserted {
            document: doc! { "_id": 1, "title": "x" },
        };
        assert!(inserted.is_inserted());
        assert_eq!(inserted.document().unwrap().get_i32("_id").unwrap(), 1);
        assert_eq!(inserted.modified_count(), None);

        let modified = SaveOutcome::Modified { count: 1 };
        assert!(!modified.is_inserted());
        assert_eq!(modified.document(), None);
        assert_eq!(modified.modified_count(), Some(1));
    }

    #[test]
    fn test_save_outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(SaveOutcome::Modified { count: 0 }).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "modified", "count": 0 }));

        let json = serde_json::to_value(SaveOutcome::Inserted {
            document: doc! { "title": "x" },
        })
        .unwrap();
        assert_eq!(json["kind"], "inserted");
        assert_eq!(json["document"]["title"], "x");
    }

    #[test]
    fn test_ensure_id_generates_leading_identity() {
        let doc = ensure_id(doc! { "title": "Harry Potter" });
        assert_eq!(doc.keys().next().map(String::as_str), Some("_id"));
        assert!(doc.get_object_id("_id").is_ok());
        assert_eq!(doc.get_str("title").unwrap(), "Harry Potter");
    }

    #[test]
    fn test_ensure_id_keeps_existing_identity() {
        let doc = ensure_id(doc! { "_id": "isbn-1", "title": "x" });
        assert_eq!(doc, doc! { "_id": "isbn-1", "title": "x" });
    }

    #[test]
    fn test_is_operator_document() {
        assert!(is_operator_document(&doc! { "$set": { "a": 1 } }));
        assert!(is_operator_document(&doc! { "$inc": { "n": 1 } }));
        assert!(!is_operator_document(&doc! { "a": 1 }));
        assert!(!is_operator_document(&doc! {}));
    }
}
