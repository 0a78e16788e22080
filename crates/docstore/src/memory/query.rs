//! Query matching, sorting and projection over in-memory documents

use super::MemoryError;
use crate::options::integer;
use bson::{Bson, Document};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

/// Resolves a dotted path (`author.name`) inside `doc`
pub(crate) fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Checks `doc` against a query document
pub(crate) fn matches(doc: &Document, filter: &Document) -> Result<bool, MemoryError> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => clauses(condition, key)?
                .iter()
                .map(|clause| matches(doc, clause))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .all(|m| m),
            "$or" => clauses(condition, key)?
                .iter()
                .map(|clause| matches(doc, clause))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .any(|m| m),
            op if op.starts_with('$') => {
                return Err(MemoryError::UnsupportedOperator(op.to_string()))
            }
            path => field_matches(lookup(doc, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(condition: &'a Bson, operator: &str) -> Result<Vec<&'a Document>, MemoryError> {
    let malformed = || MemoryError::Malformed(format!("{} must be an array of objects", operator));
    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| item.as_document().ok_or_else(malformed))
            .collect(),
        _ => Err(malformed()),
    }
}

fn is_operator_expression(condition: &Bson) -> bool {
    match condition {
        Bson::Document(doc) => doc.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn field_matches(actual: Option<&Bson>, condition: &Bson) -> Result<bool, MemoryError> {
    if !is_operator_expression(condition) {
        return literal_matches(actual, condition);
    }

    let Bson::Document(expression) = condition else {
        return Ok(false);
    };

    for (operator, operand) in expression {
        let matched = match operator.as_str() {
            "$eq" => literal_matches(actual, operand)?,
            "$ne" => !literal_matches(actual, operand)?,
            "$gt" => any_value(actual, |v| compare(v, operand) == Some(Ordering::Greater)),
            "$gte" => any_value(actual, |v| {
                matches!(compare(v, operand), Some(Ordering::Greater | Ordering::Equal))
            }),
            "$lt" => any_value(actual, |v| compare(v, operand) == Some(Ordering::Less)),
            "$lte" => any_value(actual, |v| {
                matches!(compare(v, operand), Some(Ordering::Less | Ordering::Equal))
            }),
            "$in" => in_list(actual, operand, operator)?,
            "$nin" => !in_list(actual, operand, operator)?,
            "$exists" => {
                let wanted = operand.as_bool().ok_or_else(|| {
                    MemoryError::Malformed("$exists needs a boolean".to_string())
                })?;
                actual.is_some() == wanted
            }
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    MemoryError::Malformed("$regex needs a string".to_string())
                })?;
                let flags = expression.get_str("$options").unwrap_or_default();
                let regex = build_regex(pattern, flags)?;
                any_value(actual, |v| v.as_str().is_some_and(|s| regex.is_match(s)))
            }
            "$options" => true,
            other => return Err(MemoryError::UnsupportedOperator(other.to_string())),
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn in_list(actual: Option<&Bson>, operand: &Bson, operator: &str) -> Result<bool, MemoryError> {
    let Bson::Array(candidates) = operand else {
        return Err(MemoryError::Malformed(format!("{} needs an array", operator)));
    };
    for candidate in candidates {
        if literal_matches(actual, candidate)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Applies `predicate` to the value, or to each element when it is an array
fn any_value(actual: Option<&Bson>, predicate: impl Fn(&Bson) -> bool) -> bool {
    match actual {
        Some(Bson::Array(items)) => items.iter().any(&predicate),
        Some(value) => predicate(value),
        None => false,
    }
}

fn literal_matches(actual: Option<&Bson>, expected: &Bson) -> Result<bool, MemoryError> {
    match expected {
        Bson::RegularExpression(re) => {
            let regex = build_regex(&re.pattern, &re.options)?;
            Ok(any_value(actual, |v| v.as_str().is_some_and(|s| regex.is_match(s))))
        }
        Bson::Null => Ok(matches!(actual, None | Some(Bson::Null))),
        _ => Ok(match actual {
            Some(value @ Bson::Array(items)) => {
                values_equal(value, expected)
                    || items.iter().any(|item| values_equal(item, expected))
            }
            Some(value) => values_equal(value, expected),
            None => false,
        }),
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, MemoryError> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| MemoryError::InvalidRegex(e.to_string()))
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

/// Equality that treats 1, 1_i64 and 1.0 as the same value
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between two values of comparable types
fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::Null, Bson::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_)) => 1,
        Some(Bson::String(_) | Bson::Symbol(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::Binary(_)) => 5,
        Some(Bson::ObjectId(_)) => 6,
        Some(Bson::Boolean(_)) => 7,
        Some(Bson::DateTime(_)) => 8,
        Some(Bson::Timestamp(_)) => 9,
        Some(_) => 10,
    }
}

/// Sorts by a `{ field: 1 | -1, ... }` specification
pub(crate) fn sort(docs: &mut [Document], spec: &Document) -> Result<(), MemoryError> {
    let keys = spec
        .iter()
        .map(|(field, direction)| match integer(direction) {
            Some(1) => Ok((field.as_str(), false)),
            Some(-1) => Ok((field.as_str(), true)),
            _ => Err(MemoryError::Malformed(format!(
                "sort direction for '{}' must be 1 or -1",
                field
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;

    docs.sort_by(|a, b| {
        for (field, descending) in &keys {
            let (x, y) = (lookup(a, field), lookup(b, field));
            let ordering = type_rank(x).cmp(&type_rank(y)).then_with(|| match (x, y) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
            let ordering = if *descending { ordering.reverse() } else { ordering };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(())
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        other => number(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

/// Applies an inclusion or exclusion projection to top-level fields
pub(crate) fn project(doc: Document, projection: &Document) -> Document {
    let include_id = projection.get("_id").map(truthy).unwrap_or(true);
    let only_id = projection.len() == 1 && projection.contains_key("_id");
    let inclusive = projection
        .iter()
        .any(|(field, flag)| field != "_id" && truthy(flag))
        || (only_id && include_id);

    doc.into_iter()
        .filter(|(field, _)| {
            if field == "_id" {
                return include_id;
            }
            let listed = projection.iter().find(|(p, _)| {
                p.as_str() == field || p.split('.').next() == Some(field.as_str())
            });
            match listed {
                Some((_, flag)) => truthy(flag),
                None => !inclusive,
            }
        })
        .collect()
}
