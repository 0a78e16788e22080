//! Per-call option normalization
//!
//! Callers pass options as a loose mapping. Reads get their projection pulled
//! out into a separate argument; writes get the multi/upsert flags and the
//! acknowledgement level parsed into typed values.

use crate::Result;
use bson::{Bson, Document};
use docstore_common::DocStoreError;
use std::time::Duration;

/// Reserved option key carrying the field projection
pub const PROJECTION_KEY: &str = "fields";

const EXPECT_OPTIONS: &str = "object with well-typed multi, upsert, w and j entries";
const WRITE_KEYS: [&str; 5] = ["multi", "upsert", "w", "j", "safe"];
const EXPECT_READ_OPTIONS: &str = "object with well-typed fields, sort, skip, limit, batchSize and maxTimeMS entries";

/// How many nodes must confirm a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteNodes {
    /// Exactly this many nodes; 0 is fire and forget
    Count(u32),
    /// A majority of voting nodes
    Majority,
}

/// Write acknowledgement: the node requirement (`w`) and the journal
/// requirement (`j`), each left to the collaborator's default when unset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Acknowledgement {
    pub nodes: Option<WriteNodes>,
    pub journal: Option<bool>,
}

impl Acknowledgement {
    /// Single-node acknowledgement (`w: 1`)
    pub fn single_node() -> Self {
        Self {
            nodes: Some(WriteNodes::Count(1)),
            journal: None,
        }
    }

    /// The confirmed-write level used by `save` (`w: 1, j: true`)
    pub fn confirmed() -> Self {
        Self {
            nodes: Some(WriteNodes::Count(1)),
            journal: Some(true),
        }
    }

    pub fn majority() -> Self {
        Self {
            nodes: Some(WriteNodes::Majority),
            journal: None,
        }
    }

    /// Fire and forget (`w: 0`)
    pub fn unacknowledged() -> Self {
        Self {
            nodes: Some(WriteNodes::Count(0)),
            journal: None,
        }
    }

    /// True when neither `w` nor `j` was given
    pub fn is_default(&self) -> bool {
        self.nodes.is_none() && self.journal.is_none()
    }

    fn from_options(options: &Document) -> Result<Self> {
        let invalid = || DocStoreError::invalid("options", EXPECT_OPTIONS);

        let journal = options
            .get("j")
            .map(|j| j.as_bool().ok_or_else(invalid))
            .transpose()?;

        let nodes = match options.get("w") {
            None => None,
            Some(Bson::String(s)) if s == "majority" => Some(WriteNodes::Majority),
            Some(value) => match integer(value).and_then(|n| u32::try_from(n).ok()) {
                Some(n) => Some(WriteNodes::Count(n)),
                None => return Err(invalid()),
            },
        };

        // Legacy `safe: true` asks for a confirmed write unless `w`/`j` say otherwise
        match options.get("safe") {
            None | Some(Bson::Boolean(false)) => Ok(Self { nodes, journal }),
            Some(Bson::Boolean(true)) => Ok(Self {
                nodes: nodes.or(Some(WriteNodes::Count(1))),
                journal: journal.or(Some(true)),
            }),
            Some(_) => Err(invalid()),
        }
    }
}

/// Options for read operations (find, findOne, count)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadOptions {
    /// Field projection; `None` returns whole documents
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub batch_size: Option<u32>,
    pub max_time: Option<Duration>,
    /// Caller options this layer does not interpret, passed through untouched
    pub extra: Document,
}

impl ReadOptions {
    /// Splits the reserved projection key out of the caller's options and
    /// parses the cursor knobs every collaborator understands.
    ///
    /// An empty projection mapping is treated as "no projection".
    pub fn from_document(mut options: Document) -> Result<Self> {
        let invalid = || DocStoreError::invalid("options", EXPECT_READ_OPTIONS);

        let projection = match options.remove(PROJECTION_KEY) {
            None | Some(Bson::Null) => None,
            Some(Bson::Document(fields)) if fields.is_empty() => None,
            Some(Bson::Document(fields)) => Some(fields),
            Some(_) => return Err(invalid()),
        };

        let sort = match options.remove("sort") {
            None | Some(Bson::Null) => None,
            Some(Bson::Document(sort)) => Some(sort),
            Some(_) => return Err(invalid()),
        };

        let skip = options
            .remove("skip")
            .map(|v| integer(&v).and_then(|n| u64::try_from(n).ok()).ok_or_else(invalid))
            .transpose()?;

        let limit = options
            .remove("limit")
            .map(|v| integer(&v).ok_or_else(invalid))
            .transpose()?;

        let batch_size = options
            .remove("batchSize")
            .map(|v| integer(&v).and_then(|n| u32::try_from(n).ok()).ok_or_else(invalid))
            .transpose()?;

        let max_time = options
            .remove("maxTimeMS")
            .map(|v| {
                integer(&v)
                    .and_then(|n| u64::try_from(n).ok())
                    .map(Duration::from_millis)
                    .ok_or_else(invalid)
            })
            .transpose()?;

        Ok(Self {
            projection,
            sort,
            skip,
            limit,
            batch_size,
            max_time,
            extra: options,
        })
    }
}

/// Options for write operations (update, remove)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    /// Apply to every matching document instead of the first one
    pub multi: bool,
    /// Insert when nothing matches
    pub upsert: bool,
    pub ack: Acknowledgement,
    /// Caller options this layer does not interpret
    pub extra: Document,
}

impl WriteOptions {
    /// Single-document write acknowledged by one node
    pub fn single_node() -> Self {
        Self {
            ack: Acknowledgement::single_node(),
            ..Self::default()
        }
    }

    /// Multi-document write acknowledged by one node
    pub fn multi_single_node() -> Self {
        Self {
            multi: true,
            ack: Acknowledgement::single_node(),
            ..Self::default()
        }
    }

    /// Parses the caller's update options
    pub fn from_document(options: &Document) -> Result<Self> {
        let extra = options
            .iter()
            .filter(|(key, _)| !WRITE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            multi: flag(options, "multi")?,
            upsert: flag(options, "upsert")?,
            ack: Acknowledgement::from_options(options)?,
            extra,
        })
    }
}

fn flag(options: &Document, key: &str) -> Result<bool> {
    match options.get(key) {
        None | Some(Bson::Null) => Ok(false),
        Some(Bson::Boolean(b)) => Ok(*b),
        Some(_) => Err(DocStoreError::invalid("options", EXPECT_OPTIONS)),
    }
}

/// Integer view of a numeric BSON value
pub(crate) fn integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        Bson::Double(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}
