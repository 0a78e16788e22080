//! The validated document store handle
//!
//! Every operation checks its arguments before anything is scheduled. A bad
//! argument comes back as an `Err` from the call itself; once the arguments
//! pass, the call returns a [`Pending`] future that owns everything it needs
//! and resolves exactly once with the collaborator's outcome.

use crate::backend::{is_operator_document, Backend, SaveOutcome};
use crate::connection::{MongoBackend, PoolConfig};
use crate::descriptor::ConnectionDescriptor;
use crate::options::{Acknowledgement, ReadOptions, WriteOptions};
use crate::validation::{self, ID_FIELD};
use crate::Result;
use bson::{Bson, Document};
use docstore_common::DocStoreError;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::debug;

/// An operation that passed validation and is waiting to be awaited
pub type Pending<T> = BoxFuture<'static, Result<T>>;

/// Opens a store on `descriptor` with the default pool settings.
///
/// The descriptor is checked before any network activity; a malformed one
/// fails here rather than in the returned future.
pub fn connect(descriptor: &str) -> Result<Pending<DocumentStore>> {
    connect_with_config(descriptor, PoolConfig::default())
}

/// Like [`connect`], with explicit pool settings. Settings spelled out in the
/// descriptor's query string take precedence.
pub fn connect_with_config(descriptor: &str, config: PoolConfig) -> Result<Pending<DocumentStore>> {
    let descriptor = ConnectionDescriptor::parse(descriptor)?;

    Ok(Box::pin(async move {
        let backend = MongoBackend::connect(&descriptor, config).await?;
        Ok(DocumentStore::with_backend(backend))
    }))
}

/// Handle over one storage collaborator (normally one pooled MongoDB client)
///
/// Cloning is cheap and every clone shares the same connection.
#[derive(Clone)]
pub struct DocumentStore {
    backend: Arc<dyn Backend>,
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

impl DocumentStore {
    /// Binds an already-connected collaborator
    pub fn with_backend(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// All documents in `collection` matching `query`.
    ///
    /// A `fields` entry in `options` becomes the projection. Zero matches
    /// resolve to an empty vector.
    pub fn find(
        &self,
        collection: &str,
        query: impl Into<Bson>,
        options: Option<Bson>,
    ) -> Result<Pending<Vec<Document>>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;
        let options = ReadOptions::from_document(validation::options(options)?)?;

        debug!(target: "docstore", operation = "find", collection = %collection);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.find(&collection, filter, options).await
        }))
    }

    /// First matching document, or `None` when nothing matches
    pub fn find_one(
        &self,
        collection: &str,
        query: impl Into<Bson>,
        options: Option<Bson>,
    ) -> Result<Pending<Option<Document>>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;
        let options = ReadOptions::from_document(validation::options(options)?)?;

        debug!(target: "docstore", operation = "findOne", collection = %collection);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.find_one(&collection, filter, options).await
        }))
    }

    pub fn count(
        &self,
        collection: &str,
        query: impl Into<Bson>,
        options: Option<Bson>,
    ) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;
        let options = ReadOptions::from_document(validation::options(options)?)?;

        debug!(target: "docstore", operation = "count", collection = %collection);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.count(&collection, filter, options).await
        }))
    }

    /// Distinct values of `field` among matching documents, in the order the
    /// collaborator reports them
    pub fn distinct(
        &self,
        collection: &str,
        field: &str,
        query: impl Into<Bson>,
    ) -> Result<Pending<Vec<Bson>>> {
        let collection = validation::collection_name(collection)?.to_string();
        let field = validation::field_name(field)?.to_string();
        let filter = validation::mapping("query", query.into())?;

        debug!(target: "docstore", operation = "distinct", collection = %collection, field = %field);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.distinct(&collection, &field, filter).await
        }))
    }

    /// Runs an aggregation pipeline against the primary
    pub fn aggregate(
        &self,
        collection: &str,
        pipeline: impl Into<Bson>,
    ) -> Result<Pending<Vec<Document>>> {
        let collection = validation::collection_name(collection)?.to_string();
        let pipeline = validation::pipeline(pipeline.into())?;

        debug!(target: "docstore", operation = "aggregate", collection = %collection, stages = pipeline.len());
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.aggregate(&collection, pipeline).await
        }))
    }

    /// Inserts one document or an array of documents with single-node
    /// acknowledgement. Resolves to the inserted documents, generated `_id`s
    /// included.
    pub fn insert(&self, collection: &str, docs: impl Into<Bson>) -> Result<Pending<Vec<Document>>> {
        let collection = validation::collection_name(collection)?.to_string();
        let docs = validation::documents(docs.into())?;

        debug!(target: "docstore", operation = "insert", collection = %collection, count = docs.len());
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend
                .insert(&collection, docs, Acknowledgement::single_node())
                .await
        }))
    }

    /// Updates matching documents and resolves to the modified count.
    ///
    /// `body` is either an operator document or a full replacement. A
    /// replacement cannot be combined with `multi: true`.
    pub fn update(
        &self,
        collection: &str,
        query: impl Into<Bson>,
        body: impl Into<Bson>,
        options: Option<Bson>,
    ) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;
        let body = validation::mapping("body", body.into())?;
        let options = WriteOptions::from_document(&validation::options(options)?)?;

        if options.multi && !is_operator_document(&body) {
            return Err(DocStoreError::invalid(
                "body",
                "update operator object when multi is set",
            ));
        }

        self.dispatch_update("update", collection, filter, body, options)
    }

    /// Updates every matching document with single-node acknowledgement.
    ///
    /// A body without update operators is treated as a set of fields to
    /// merge, i.e. wrapped in `$set`.
    pub fn multi_update(
        &self,
        collection: &str,
        query: impl Into<Bson>,
        body: impl Into<Bson>,
    ) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;
        let body = validation::mapping("body", body.into())?;

        let body = if is_operator_document(&body) {
            body
        } else {
            set_fields(body)
        };

        self.dispatch_update(
            "multiUpdate",
            collection,
            filter,
            body,
            WriteOptions::multi_single_node(),
        )
    }

    /// Inserts `document` when it has no stored counterpart and replaces the
    /// stored one otherwise, waiting for a journaled write.
    ///
    /// Resolves to [`SaveOutcome::Inserted`] with the stored document (with
    /// its generated `_id`), or [`SaveOutcome::Modified`] with 0 or 1.
    pub fn save(&self, collection: &str, document: impl Into<Bson>) -> Result<Pending<SaveOutcome>> {
        let collection = validation::collection_name(collection)?.to_string();
        let document = validation::mapping("document", document.into())?;

        debug!(target: "docstore", operation = "save", collection = %collection);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend
                .save(&collection, document, Acknowledgement::confirmed())
                .await
        }))
    }

    /// Saves an identified document and resolves to that same document,
    /// whichever branch the save took
    pub fn save_complete(
        &self,
        collection: &str,
        document: impl Into<Bson>,
    ) -> Result<Pending<Document>> {
        let collection = validation::collection_name(collection)?.to_string();
        let document = validation::identified_document(document.into())?;

        debug!(target: "docstore", operation = "saveComplete", collection = %collection);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend
                .save(&collection, document.clone(), Acknowledgement::confirmed())
                .await?;
            Ok(document)
        }))
    }

    /// Merges the fields of an identified document into the stored record.
    ///
    /// The identity is used as the filter and left out of the `$set` body.
    /// The caller's value is not modified.
    pub fn save_updates(&self, collection: &str, document: impl Into<Bson>) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let mut fields = validation::identified_document(document.into())?;

        let mut filter = Document::new();
        if let Some(id) = fields.remove(ID_FIELD) {
            filter.insert(ID_FIELD, id);
        }

        self.dispatch_update(
            "saveUpdates",
            collection,
            filter,
            set_fields(fields),
            WriteOptions::single_node(),
        )
    }

    /// Removes the record with the document's `_id`; other fields are ignored.
    /// Resolves to 0 or 1.
    pub fn remove_single(&self, collection: &str, document: impl Into<Bson>) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let document = validation::identified_document(document.into())?;

        let mut filter = Document::new();
        if let Some(id) = document.get(ID_FIELD) {
            filter.insert(ID_FIELD, id.clone());
        }

        self.dispatch_remove("removeSingle", collection, filter, WriteOptions::single_node())
    }

    /// Removes every document matching `query`
    pub fn remove_multiple(&self, collection: &str, query: impl Into<Bson>) -> Result<Pending<u64>> {
        let collection = validation::collection_name(collection)?.to_string();
        let filter = validation::mapping("query", query.into())?;

        self.dispatch_remove(
            "removeMultiple",
            collection,
            filter,
            WriteOptions::multi_single_node(),
        )
    }

    fn dispatch_update(
        &self,
        operation: &'static str,
        collection: String,
        filter: Document,
        body: Document,
        options: WriteOptions,
    ) -> Result<Pending<u64>> {
        debug!(target: "docstore", operation, collection = %collection, multi = options.multi, upsert = options.upsert);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.update(&collection, filter, body, options).await
        }))
    }

    fn dispatch_remove(
        &self,
        operation: &'static str,
        collection: String,
        filter: Document,
        options: WriteOptions,
    ) -> Result<Pending<u64>> {
        debug!(target: "docstore", operation, collection = %collection, multi = options.multi);
        let backend = Arc::clone(&self.backend);
        Ok(Box::pin(async move {
            backend.remove(&collection, filter, options).await
        }))
    }
}

fn set_fields(fields: Document) -> Document {
    let mut body = Document::new();
    body.insert("$set", fields);
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use bson::{bson, doc};

    fn store() -> DocumentStore {
        DocumentStore::with_backend(MemoryBackend::new())
    }

    #[test]
    fn test_connect_rejects_malformed_descriptor_synchronously() {
        for descriptor in ["", "localhost:27017/db", "mongodb://localhost:27017", "mongodb://host:99999/db"] {
            let err = connect(descriptor).err().expect("descriptor accepted");
            assert_eq!(err.param(), Some("connection"), "{:?}", descriptor);
        }
    }

    #[test]
    fn test_connect_accepts_well_formed_descriptor() {
        // The future is never polled, so no connection is attempted.
        assert!(connect("mongodb://localhost:27017/docstore_test").is_ok());
    }

    #[test]
    fn test_set_fields_wraps_body() {
        assert_eq!(
            set_fields(doc! { "title": "x" }),
            doc! { "$set": { "title": "x" } }
        );
    }

    #[test]
    fn test_update_rejects_multi_replacement() {
        let err = store()
            .update("book", doc! {}, doc! { "title": "x" }, Some(bson!({ "multi": true })))
            .err()
            .expect("replacement accepted");
        assert_eq!(err.param(), Some("body"));
    }

    #[test]
    fn test_update_rejects_mistyped_options() {
        let err = store()
            .update("book", doc! {}, doc! { "$set": { "a": 1 } }, Some(bson!({ "upsert": "yes" })))
            .err()
            .expect("options accepted");
        assert_eq!(err.param(), Some("options"));
    }

    #[test]
    fn test_distinct_requires_field() {
        let err = store().distinct("book", "", doc! {}).err().expect("field accepted");
        assert_eq!(err.param(), Some("field"));
    }

    #[tokio::test]
    async fn test_store_clones_share_backend() {
        let memory = MemoryBackend::new();
        let store = DocumentStore::with_backend(memory.clone());
        let other = store.clone();

        store
            .insert("book", doc! { "_id": 1, "title": "x" })
            .unwrap()
            .await
            .unwrap();

        assert_eq!(other.count("book", doc! {}, None).unwrap().await.unwrap(), 1);
        assert_eq!(memory.documents("book").len(), 1);
    }
}
