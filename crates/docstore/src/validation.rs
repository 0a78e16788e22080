//! Parameter validation for store operations
//!
//! Every operation runs these guards before any I/O is scheduled. A failed
//! guard yields `InvalidArgument` naming the parameter and its expected shape.
//!
//! Values arrive as `Bson` so that callers holding loosely typed data (decoded
//! JSON, values built with `bson!`) get the same checks a dynamic caller would.

use crate::Result;
use bson::{Bson, Document};
use docstore_common::DocStoreError;

pub(crate) const ID_FIELD: &str = "_id";

const EXPECT_STRING: &str = "non empty string";
const EXPECT_OBJECT: &str = "object";
const EXPECT_OBJECT_OR_ARRAY: &str = "an array or an object";
const EXPECT_OBJECT_WITH_ID: &str = "object with an _id field";
const EXPECT_PIPELINE: &str = "array of objects";

/// True for a string with at least one character
pub fn is_non_empty_string(value: &str) -> bool {
    !value.is_empty()
}

/// True for a key-value mapping. Arrays, dates and scalars are not mappings.
pub fn is_mapping(value: &Bson) -> bool {
    matches!(value, Bson::Document(_))
}

/// True for a mapping, or an array whose every element is a mapping
pub fn is_mapping_or_sequence_of_mappings(value: &Bson) -> bool {
    match value {
        Bson::Document(_) => true,
        Bson::Array(items) => items.iter().all(is_mapping),
        _ => false,
    }
}

/// Checks a collection name.
///
/// Besides being non-empty, the name may not contain NUL bytes or `$`,
/// neither of which the server accepts in a namespace.
pub fn collection_name(name: &str) -> Result<&str> {
    if !is_non_empty_string(name) || name.contains('\0') || name.contains('$') {
        return Err(DocStoreError::invalid("collection", EXPECT_STRING));
    }
    Ok(name)
}

/// Non-empty field name (used by `distinct`)
pub fn field_name(name: &str) -> Result<&str> {
    if !is_non_empty_string(name) {
        return Err(DocStoreError::invalid("field", EXPECT_STRING));
    }
    Ok(name)
}

/// Requires `value` to be a mapping and unwraps it
pub fn mapping(param: &'static str, value: Bson) -> Result<Document> {
    match value {
        Bson::Document(doc) => Ok(doc),
        _ => Err(DocStoreError::invalid(param, EXPECT_OBJECT)),
    }
}

/// Optional options mapping; absence or an explicit null means "no options"
pub fn options(value: Option<Bson>) -> Result<Document> {
    match value {
        None | Some(Bson::Null) => Ok(Document::new()),
        Some(value) => mapping("options", value),
    }
}

/// Insert payload: one mapping or a non-empty array of mappings
pub fn documents(value: Bson) -> Result<Vec<Document>> {
    let invalid = || DocStoreError::invalid("docs", EXPECT_OBJECT_OR_ARRAY);

    if !is_mapping_or_sequence_of_mappings(&value) {
        return Err(invalid());
    }

    match value {
        Bson::Document(doc) => Ok(vec![doc]),
        Bson::Array(items) if !items.is_empty() => Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Bson::Document(doc) => Some(doc),
                _ => None,
            })
            .collect()),
        _ => Err(invalid()),
    }
}

/// A document that must carry an identity field
pub fn identified_document(value: Bson) -> Result<Document> {
    let doc = mapping("document", value)?;
    if !doc.contains_key(ID_FIELD) {
        return Err(DocStoreError::invalid("document", EXPECT_OBJECT_WITH_ID));
    }
    Ok(doc)
}

/// Aggregation pipeline: an array of stage mappings
pub fn pipeline(value: Bson) -> Result<Vec<Document>> {
    match value {
        Bson::Array(stages) if stages.iter().all(is_mapping) => Ok(stages
            .into_iter()
            .filter_map(|stage| match stage {
                Bson::Document(doc) => Some(doc),
                _ => None,
            })
            .collect()),
        _ => Err(DocStoreError::invalid("pipeline", EXPECT_PIPELINE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc, DateTime};

    fn not_mappings() -> Vec<Bson> {
        vec![
            Bson::String("somestring".to_string()),
            Bson::Int32(4),
            Bson::Boolean(true),
            bson!([]),
            Bson::DateTime(DateTime::now()),
            Bson::Null,
        ]
    }

    #[test]
    fn test_valid_collection_names() {
        for name in ["book", "users", "a", "app.logs"] {
            assert!(collection_name(name).is_ok(), "rejected {:?}", name);
        }
    }

    #[test]
    fn test_invalid_collection_names() {
        for name in ["", "bad\0name", "$cmd"] {
            let err = collection_name(name).unwrap_err();
            assert_eq!(err.param(), Some("collection"));
            assert!(err.to_string().starts_with("Invalid collection"));
        }
    }

    #[test]
    fn test_mapping_accepts_document() {
        let doc = mapping("query", bson!({ "title": "x" })).unwrap();
        assert_eq!(doc, doc! { "title": "x" });
    }

    #[test]
    fn test_mapping_rejects_non_documents() {
        for value in not_mappings() {
            let err = mapping("query", value).unwrap_err();
            assert_eq!(err.param(), Some("query"));
        }
    }

    #[test]
    fn test_options_absent_is_empty() {
        assert!(options(None).unwrap().is_empty());
        assert_eq!(
            options(Some(bson!({ "limit": 2 }))).unwrap(),
            doc! { "limit": 2 }
        );
    }

    #[test]
    fn test_options_rejects_non_documents() {
        for value in not_mappings().into_iter().filter(|v| *v != Bson::Null) {
            assert_eq!(options(Some(value)).unwrap_err().param(), Some("options"));
        }
    }

    #[test]
    fn test_options_null_is_absent() {
        assert!(options(Some(Bson::Null)).unwrap().is_empty());
    }

    #[test]
    fn test_documents_single_and_many() {
        assert_eq!(documents(bson!({ "a": 1 })).unwrap().len(), 1);
        assert_eq!(
            documents(bson!([{ "a": 1 }, { "a": 2 }, { "a": 3 }])).unwrap().len(),
            3
        );
    }

    #[test]
    fn test_documents_rejects_bad_payloads() {
        for value in [
            Bson::String("somestring".to_string()),
            Bson::Int32(4),
            Bson::Boolean(true),
            Bson::DateTime(DateTime::now()),
            bson!([]),
            bson!([{ "a": 1 }, 2]),
        ] {
            let err = documents(value).unwrap_err();
            assert_eq!(err.param(), Some("docs"));
            assert!(err.to_string().contains("Invalid docs"));
        }
    }

    #[test]
    fn test_identified_document() {
        assert!(identified_document(bson!({ "_id": 1, "a": 2 })).is_ok());
        let err = identified_document(bson!({ "a": 2 })).unwrap_err();
        assert_eq!(err.param(), Some("document"));
        assert!(err.to_string().contains("_id"));
        assert_eq!(
            identified_document(Bson::Int32(3)).unwrap_err().param(),
            Some("document")
        );
    }

    #[test]
    fn test_pipeline() {
        let stages = pipeline(bson!([{ "$match": {} }, { "$limit": 1 }])).unwrap();
        assert_eq!(stages.len(), 2);
        assert!(pipeline(bson!({ "$match": {} })).is_err());
        assert!(pipeline(bson!([1])).is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(is_non_empty_string("x"));
        assert!(!is_non_empty_string(""));
        assert!(is_mapping(&bson!({})));
        assert!(!is_mapping(&bson!([])));
        assert!(is_mapping_or_sequence_of_mappings(&bson!([{}, {}])));
        assert!(!is_mapping_or_sequence_of_mappings(&bson!("x")));
    }
}
