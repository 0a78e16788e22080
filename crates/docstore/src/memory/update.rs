//! Update application for in-memory documents

use super::query::{lookup, values_equal};
use super::MemoryError;
use crate::backend::is_operator_document;
use crate::validation::ID_FIELD;
use bson::{Bson, Document};

/// Produces the updated version of `doc`. `body` is either an operator
/// document or a full replacement; the identity field never changes.
pub(crate) fn apply(doc: &Document, body: &Document) -> Result<Document, MemoryError> {
    let updated = if is_operator_document(body) {
        apply_operators(doc, body)?
    } else {
        replace(doc, body)
    };

    if let Some(id) = doc.get(ID_FIELD) {
        if !updated.get(ID_FIELD).is_some_and(|new_id| values_equal(new_id, id)) {
            return Err(MemoryError::ImmutableId);
        }
    }
    Ok(updated)
}

fn replace(doc: &Document, body: &Document) -> Document {
    let mut replaced = Document::new();
    if let Some(id) = doc.get(ID_FIELD).or_else(|| body.get(ID_FIELD)) {
        replaced.insert(ID_FIELD, id.clone());
    }
    for (key, value) in body {
        if key != ID_FIELD {
            replaced.insert(key.clone(), value.clone());
        }
    }
    replaced
}

fn apply_operators(doc: &Document, body: &Document) -> Result<Document, MemoryError> {
    let mut updated = doc.clone();

    for (operator, fields) in body {
        let fields = fields.as_document().ok_or_else(|| {
            MemoryError::Malformed(format!("{} needs an object operand", operator))
        })?;

        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(&mut updated, path, value.clone())?;
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    unset_path(&mut updated, path);
                }
            }
            "$inc" => {
                for (path, amount) in fields {
                    let current = lookup(&updated, path).cloned();
                    let next = match current {
                        None => amount.clone(),
                        Some(value) => add(&value, amount).ok_or_else(|| MemoryError::NonNumeric {
                            operator: operator.clone(),
                            field: path.clone(),
                        })?,
                    };
                    set_path(&mut updated, path, next)?;
                }
            }
            other => return Err(MemoryError::UnsupportedOperator(other.to_string())),
        }
    }
    Ok(updated)
}

fn add(value: &Bson, amount: &Bson) -> Option<Bson> {
    match (value, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b))),
        ),
        (Bson::Int32(a), Bson::Int64(b)) => Some(Bson::Int64(i64::from(*a) + b)),
        (Bson::Int64(a), Bson::Int32(b)) => Some(Bson::Int64(a + i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Some(Bson::Int64(a + b)),
        (Bson::Double(a), Bson::Double(b)) => Some(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Some(Bson::Double(a + f64::from(*b))),
        (Bson::Double(a), Bson::Int64(b)) => Some(Bson::Double(a + *b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Some(Bson::Double(f64::from(*a) + b)),
        (Bson::Int64(a), Bson::Double(b)) => Some(Bson::Double(*a as f64 + b)),
        _ => None,
    }
}

fn set_path(doc: &mut Document, path: &str, value: Bson) -> Result<(), MemoryError> {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !doc.contains_key(head) {
                doc.insert(head, Document::new());
            }
            match doc.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(MemoryError::Malformed(format!(
                    "cannot create field '{}' inside a non-object value",
                    rest
                ))),
            }
        }
    }
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}

/// Seed document for an upsert: the filter's plain equality fields
pub(crate) fn upsert_seed(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(key, value)| {
            !key.starts_with('$')
                && !key.contains('.')
                && !matches!(value, Bson::RegularExpression(_))
                && !value
                    .as_document()
                    .is_some_and(|d| d.keys().any(|k| k.starts_with('$')))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
