//! In-process storage collaborator
//!
//! Keeps every collection as a vector of documents behind one lock. It speaks
//! the common subset of the MongoDB query and update language, which is
//! enough to exercise the store without a server.

mod query;
mod update;

use crate::backend::{ensure_id, is_operator_document, Backend, SaveOutcome};
use crate::options::{Acknowledgement, ReadOptions, WriteOptions};
use crate::validation::ID_FIELD;
use crate::Result;
use async_trait::async_trait;
use bson::{Bson, Document};
use docstore_common::DocStoreError;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// Failures raised by the in-memory collaborator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MemoryError {
    #[error("E11000 duplicate key error collection: {collection} dup key: {{ _id: {id} }}")]
    DuplicateKey { collection: String, id: Bson },

    #[error("unknown operator: {0}")]
    UnsupportedOperator(String),

    #[error("unsupported pipeline stage: {0}")]
    UnsupportedStage(String),

    #[error("invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("cannot apply {operator} to a non-numeric value at '{field}'")]
    NonNumeric { operator: String, field: String },

    #[error("performing an update on the path '_id' would modify the immutable field '_id'")]
    ImmutableId,

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl From<MemoryError> for DocStoreError {
    fn from(err: MemoryError) -> Self {
        DocStoreError::operation(err)
    }
}

/// Shared in-memory collections
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection's documents in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the collections created so far
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drops every collection
    pub fn clear(&self) {
        self.collections.write().clear();
    }

    fn select(&self, collection: &str, filter: &Document, options: &ReadOptions) -> std::result::Result<Vec<Document>, MemoryError> {
        let mut selected = Vec::new();
        if let Some(docs) = self.collections.read().get(collection) {
            for doc in docs {
                if query::matches(doc, filter)? {
                    selected.push(doc.clone());
                }
            }
        }

        if let Some(spec) = &options.sort {
            query::sort(&mut selected, spec)?;
        }

        let skip = options.skip.unwrap_or(0) as usize;
        let selected = selected.into_iter().skip(skip);
        let selected: Vec<Document> = match options.limit.map(i64::unsigned_abs) {
            Some(limit) if limit > 0 => selected.take(limit as usize).collect(),
            _ => selected.collect(),
        };

        Ok(match &options.projection {
            Some(projection) => selected
                .into_iter()
                .map(|doc| query::project(doc, projection))
                .collect(),
            None => selected,
        })
    }
}

fn duplicate(collection: &str, id: &Bson) -> MemoryError {
    MemoryError::DuplicateKey {
        collection: collection.to_string(),
        id: id.clone(),
    }
}

fn has_id(docs: &[Document], id: &Bson) -> bool {
    docs.iter()
        .any(|doc| doc.get(ID_FIELD).is_some_and(|existing| query::values_equal(existing, id)))
}

fn integer_stage(stage: &str, value: &Bson) -> std::result::Result<u64, MemoryError> {
    crate::options::integer(value)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| MemoryError::Malformed(format!("{} needs a non-negative integer", stage)))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Vec<Document>> {
        Ok(self.select(collection, &filter, &options)?)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        mut options: ReadOptions,
    ) -> Result<Option<Document>> {
        options.limit = Some(1);
        Ok(self.select(collection, &filter, &options)?.into_iter().next())
    }

    async fn count(&self, collection: &str, filter: Document, mut options: ReadOptions) -> Result<u64> {
        options.projection = None;
        Ok(self.select(collection, &filter, &options)?.len() as u64)
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>> {
        let docs = self.select(collection, &filter, &ReadOptions::default())?;

        let mut values: Vec<Bson> = Vec::new();
        for doc in &docs {
            let found = match query::lookup(doc, field) {
                Some(Bson::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in found {
                if !values.iter().any(|v| query::values_equal(v, &value)) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut docs = self.documents(collection);

        for stage in &pipeline {
            let (name, spec) = match stage.iter().next() {
                Some(entry) if stage.len() == 1 => entry,
                _ => {
                    return Err(MemoryError::Malformed(
                        "a pipeline stage must have exactly one field".to_string(),
                    )
                    .into())
                }
            };

            docs = match (name.as_str(), spec) {
                ("$match", Bson::Document(criteria)) => {
                    let mut kept = Vec::with_capacity(docs.len());
                    for doc in docs {
                        if query::matches(&doc, criteria)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                ("$sort", Bson::Document(order)) => {
                    query::sort(&mut docs, order)?;
                    docs
                }
                ("$skip", value) => {
                    let n = integer_stage("$skip", value)?;
                    docs.into_iter().skip(n as usize).collect()
                }
                ("$limit", value) => {
                    let n = integer_stage("$limit", value)?;
                    docs.into_iter().take(n as usize).collect()
                }
                ("$project", Bson::Document(projection)) => docs
                    .into_iter()
                    .map(|doc| query::project(doc, projection))
                    .collect(),
                (other, _) => return Err(MemoryError::UnsupportedStage(other.to_string()).into()),
            };
        }
        Ok(docs)
    }

    async fn insert(
        &self,
        collection: &str,
        docs: Vec<Document>,
        _ack: Acknowledgement,
    ) -> Result<Vec<Document>> {
        let docs: Vec<Document> = docs.into_iter().map(ensure_id).collect();

        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        for (index, doc) in docs.iter().enumerate() {
            if let Some(id) = doc.get(ID_FIELD) {
                if has_id(stored, id) || has_id(&docs[..index], id) {
                    return Err(duplicate(collection, id).into());
                }
            }
        }

        stored.extend(docs.iter().cloned());
        Ok(docs)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        body: Document,
        options: WriteOptions,
    ) -> Result<u64> {
        if options.multi && !is_operator_document(&body) {
            return Err(MemoryError::Malformed(
                "multi update only works with $ operators".to_string(),
            )
            .into());
        }

        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        let mut targets = Vec::new();
        for (index, doc) in stored.iter().enumerate() {
            if query::matches(doc, &filter)? {
                targets.push(index);
                if !options.multi {
                    break;
                }
            }
        }

        if targets.is_empty() {
            if options.upsert {
                let seed = update::upsert_seed(&filter);
                let created = ensure_id(update::apply(&seed, &body)?);
                stored.push(created);
            }
            return Ok(0);
        }

        let mut modified = 0;
        for index in targets {
            let updated = update::apply(&stored[index], &body)?;
            if updated != stored[index] {
                stored[index] = updated;
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn save(
        &self,
        collection: &str,
        document: Document,
        _ack: Acknowledgement,
    ) -> Result<SaveOutcome> {
        let document = ensure_id(document);

        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();

        let existing = document.get(ID_FIELD).and_then(|id| {
            stored.iter().position(|doc| {
                doc.get(ID_FIELD)
                    .is_some_and(|existing| query::values_equal(existing, id))
            })
        });

        match existing {
            Some(index) if stored[index] == document => Ok(SaveOutcome::Modified { count: 0 }),
            Some(index) => {
                stored[index] = document;
                Ok(SaveOutcome::Modified { count: 1 })
            }
            None => {
                stored.push(document.clone());
                Ok(SaveOutcome::Inserted { document })
            }
        }
    }

    async fn remove(&self, collection: &str, filter: Document, options: WriteOptions) -> Result<u64> {
        let mut collections = self.collections.write();
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = HashSet::new();
        for (index, doc) in stored.iter().enumerate() {
            if query::matches(doc, &filter)? {
                doomed.insert(index);
                if !options.multi {
                    break;
                }
            }
        }

        let mut index = 0;
        stored.retain(|_| {
            let keep = !doomed.contains(&index);
            index += 1;
            keep
        });
        Ok(doomed.len() as u64)
    }
}
