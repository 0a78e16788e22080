//! MongoDB connection management and the driver-backed collaborator

use crate::backend::{ensure_id, is_operator_document, Backend, SaveOutcome};
use crate::descriptor::ConnectionDescriptor;
use crate::options::{Acknowledgement, ReadOptions, WriteNodes, WriteOptions};
use crate::validation::ID_FIELD;
use crate::Result;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use docstore_common::DocStoreError;
use futures::TryStreamExt;
use mongodb::{
    options::{
        Acknowledgment, AggregateOptions, ClientOptions, CountOptions, DeleteOptions,
        FindOneOptions, FindOptions, InsertManyOptions, InsertOneOptions, ReadPreference,
        ReplaceOptions, SelectionCriteria, ServerApi, ServerApiVersion, UpdateOptions,
        WriteConcern,
    },
    Client, Collection, Database,
};
use std::time::Duration;
use tracing::{info, warn};

/// Connection pool configuration
///
/// Settings given explicitly in the connection descriptor's query string
/// take precedence over these.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: 0)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: 10)
    pub max_pool_size: Option<u32>,
    /// Maximum time a connection can remain idle before being closed (default: none)
    pub max_idle_time: Option<Duration>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: Some(10),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("docstore".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(self, client_options: &mut ClientOptions) {
        if client_options.min_pool_size.is_none() {
            client_options.min_pool_size = self.min_pool_size;
        }
        if client_options.max_pool_size.is_none() {
            client_options.max_pool_size = self.max_pool_size;
        }
        if client_options.max_idle_time.is_none() {
            client_options.max_idle_time = self.max_idle_time;
        }
        if client_options.connect_timeout.is_none() {
            client_options.connect_timeout = self.connect_timeout;
        }
        if client_options.server_selection_timeout.is_none() {
            client_options.server_selection_timeout = self.server_selection_timeout;
        }
        if client_options.app_name.is_none() {
            client_options.app_name = self.app_name;
        }
    }
}

/// MongoDB collaborator holding one client (and its pool) bound to the
/// descriptor's database
#[derive(Clone)]
pub struct MongoBackend {
    client: Client,
    database: Database,
}

impl std::fmt::Debug for MongoBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MongoBackend")
            .field("database", &self.database.name())
            .finish()
    }
}

impl MongoBackend {
    /// Opens the pool and pings the server once.
    ///
    /// Authentication failures, unreachable hosts and timeouts surface as
    /// `OperationFailure` carrying the driver error. There is no retry.
    pub async fn connect(descriptor: &ConnectionDescriptor, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(descriptor.as_str()).await?;
        config.apply(&mut client_options);

        // Set stable API version for compatibility
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)?;

        let database = client.default_database().ok_or_else(|| {
            DocStoreError::Connection(
                "No default database specified in connection string".to_string(),
            )
        })?;

        database.run_command(doc! { "ping": 1 }).await?;

        info!(target: "docstore", descriptor = %descriptor, "Connected to MongoDB");

        Ok(Self { client, database })
    }

    /// Get a reference to the database
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }
}

fn write_concern(ack: Acknowledgement) -> Option<WriteConcern> {
    if ack.is_default() {
        return None;
    }
    let mut concern = WriteConcern::default();
    concern.w = ack.nodes.map(|nodes| match nodes {
        WriteNodes::Count(n) => Acknowledgment::Nodes(n),
        WriteNodes::Majority => Acknowledgment::Majority,
    });
    concern.journal = ack.journal;
    Some(concern)
}

/// Keys of `extra` plus every known option that is set but has no
/// counterpart in the driver call
fn ignored_keys<'a>(extra: &'a Document, dropped: &[(&'a str, bool)]) -> Vec<&'a str> {
    extra
        .keys()
        .map(String::as_str)
        .chain(dropped.iter().filter(|(_, set)| *set).map(|(key, _)| *key))
        .collect()
}

fn warn_ignored(operation: &str, keys: &[&str]) {
    if !keys.is_empty() {
        warn!(target: "docstore", operation, ignored = ?keys, "Ignoring unsupported options");
    }
}

#[async_trait]
impl Backend for MongoBackend {
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Vec<Document>> {
        warn_ignored("find", &ignored_keys(&options.extra, &[]));

        let mut find_options = FindOptions::default();
        find_options.projection = options.projection;
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit;
        find_options.batch_size = options.batch_size;
        find_options.max_time = options.max_time;

        let cursor = self
            .collection(collection)
            .find(filter)
            .with_options(find_options)
            .await?;

        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        options: ReadOptions,
    ) -> Result<Option<Document>> {
        warn_ignored(
            "findOne",
            &ignored_keys(
                &options.extra,
                &[
                    ("limit", options.limit.is_some()),
                    ("batchSize", options.batch_size.is_some()),
                ],
            ),
        );

        let mut find_options = FindOneOptions::default();
        find_options.projection = options.projection;
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.max_time = options.max_time;

        Ok(self
            .collection(collection)
            .find_one(filter)
            .with_options(find_options)
            .await?)
    }

    async fn count(&self, collection: &str, filter: Document, options: ReadOptions) -> Result<u64> {
        warn_ignored(
            "count",
            &ignored_keys(
                &options.extra,
                &[
                    ("fields", options.projection.is_some()),
                    ("sort", options.sort.is_some()),
                    ("batchSize", options.batch_size.is_some()),
                ],
            ),
        );

        let mut count_options = CountOptions::default();
        count_options.skip = options.skip;
        count_options.limit = options.limit.map(i64::unsigned_abs);
        count_options.max_time = options.max_time;

        Ok(self
            .collection(collection)
            .count_documents(filter)
            .with_options(count_options)
            .await?)
    }

    async fn distinct(&self, collection: &str, field: &str, filter: Document) -> Result<Vec<Bson>> {
        Ok(self.collection(collection).distinct(field, filter).await?)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let mut aggregate_options = AggregateOptions::default();
        aggregate_options.selection_criteria =
            Some(SelectionCriteria::ReadPreference(ReadPreference::Primary));

        let cursor = self
            .collection(collection)
            .aggregate(pipeline)
            .with_options(aggregate_options)
            .await?;

        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs)
    }

    async fn insert(
        &self,
        collection: &str,
        docs: Vec<Document>,
        ack: Acknowledgement,
    ) -> Result<Vec<Document>> {
        let docs: Vec<Document> = docs.into_iter().map(ensure_id).collect();

        let mut insert_options = InsertManyOptions::default();
        insert_options.write_concern = write_concern(ack);

        self.collection(collection)
            .insert_many(&docs)
            .with_options(insert_options)
            .await?;

        Ok(docs)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Document,
        body: Document,
        options: WriteOptions,
    ) -> Result<u64> {
        warn_ignored("update", &ignored_keys(&options.extra, &[]));
        let coll = self.collection(collection);

        let result = if options.multi || is_operator_document(&body) {
            let mut update_options = UpdateOptions::default();
            update_options.upsert = Some(options.upsert);
            update_options.write_concern = write_concern(options.ack);

            if options.multi {
                coll.update_many(filter, body)
                    .with_options(update_options)
                    .await?
            } else {
                coll.update_one(filter, body)
                    .with_options(update_options)
                    .await?
            }
        } else {
            let mut replace_options = ReplaceOptions::default();
            replace_options.upsert = Some(options.upsert);
            replace_options.write_concern = write_concern(options.ack);

            coll.replace_one(filter, body)
                .with_options(replace_options)
                .await?
        };

        Ok(result.modified_count)
    }

    async fn save(
        &self,
        collection: &str,
        document: Document,
        ack: Acknowledgement,
    ) -> Result<SaveOutcome> {
        let coll = self.collection(collection);

        let Some(id) = document.get(ID_FIELD).cloned() else {
            let document = ensure_id(document);

            let mut insert_options = InsertOneOptions::default();
            insert_options.write_concern = write_concern(ack);

            coll.insert_one(&document)
                .with_options(insert_options)
                .await?;

            return Ok(SaveOutcome::Inserted { document });
        };

        let mut replace_options = ReplaceOptions::default();
        replace_options.upsert = Some(true);
        replace_options.write_concern = write_concern(ack);

        let mut filter = Document::new();
        filter.insert(ID_FIELD, id);

        let result = coll
            .replace_one(filter, &document)
            .with_options(replace_options)
            .await?;

        if result.upserted_id.is_some() {
            Ok(SaveOutcome::Inserted { document })
        } else {
            Ok(SaveOutcome::Modified {
                count: result.modified_count,
            })
        }
    }

    async fn remove(&self, collection: &str, filter: Document, options: WriteOptions) -> Result<u64> {
        warn_ignored("remove", &ignored_keys(&options.extra, &[]));
        let coll = self.collection(collection);

        let mut delete_options = DeleteOptions::default();
        delete_options.write_concern = write_concern(options.ack);

        let result = if options.multi {
            coll.delete_many(filter).with_options(delete_options).await?
        } else {
            coll.delete_one(filter).with_options(delete_options).await?
        };

        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_pool_size, None);
        assert_eq!(config.max_pool_size, Some(10));
        assert_eq!(config.app_name, Some("docstore".to_string()));
    }

    #[test]
    fn test_write_concern_mapping() {
        assert!(write_concern(Acknowledgement::default()).is_none());

        let single = write_concern(Acknowledgement::single_node()).unwrap();
        assert_eq!(single.w, Some(Acknowledgment::Nodes(1)));
        assert_eq!(single.journal, None);

        let confirmed = write_concern(Acknowledgement::confirmed()).unwrap();
        assert_eq!(confirmed.w, Some(Acknowledgment::Nodes(1)));
        assert_eq!(confirmed.journal, Some(true));

        let majority = write_concern(Acknowledgement::majority()).unwrap();
        assert_eq!(majority.w, Some(Acknowledgment::Majority));

        let none = write_concern(Acknowledgement::unacknowledged()).unwrap();
        assert_eq!(none.w, Some(Acknowledgment::Nodes(0)));
    }

    #[test]
    fn test_write_concern_keeps_majority_with_journal() {
        let options = WriteOptions::from_document(&doc! { "w": "majority", "j": true }).unwrap();
        let concern = write_concern(options.ack).unwrap();
        assert_eq!(concern.w, Some(Acknowledgment::Majority));
        assert_eq!(concern.journal, Some(true));

        let options = WriteOptions::from_document(&doc! { "j": true }).unwrap();
        let concern = write_concern(options.ack).unwrap();
        assert_eq!(concern.w, None);
        assert_eq!(concern.journal, Some(true));
    }

    #[test]
    fn test_ignored_keys_lists_extra_and_dropped_options() {
        let read = ReadOptions::from_document(doc! {
            "limit": 5,
            "sort": { "title": 1 },
            "comment": "nightly"
        })
        .unwrap();

        let keys = ignored_keys(
            &read.extra,
            &[
                ("limit", read.limit.is_some()),
                ("batchSize", read.batch_size.is_some()),
            ],
        );
        assert_eq!(keys, vec!["comment", "limit"]);

        let write = WriteOptions::from_document(&doc! { "upsert": true, "wtimeout": 500 }).unwrap();
        assert_eq!(ignored_keys(&write.extra, &[]), vec!["wtimeout"]);

        assert!(ignored_keys(&Document::new(), &[("sort", false)]).is_empty());
    }

    #[tokio::test]
    async fn test_descriptor_settings_win_over_pool_config() {
        let mut client_options =
            ClientOptions::parse("mongodb://localhost:27017/test?maxPoolSize=3&appName=reports")
                .await
                .unwrap();

        PoolConfig::default().apply(&mut client_options);

        assert_eq!(client_options.max_pool_size, Some(3));
        assert_eq!(client_options.app_name, Some("reports".to_string()));
        assert_eq!(client_options.connect_timeout, Some(Duration::from_secs(10)));
    }
}
