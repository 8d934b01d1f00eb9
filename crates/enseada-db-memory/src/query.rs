//! Mango selector evaluation over JSON documents.
//!
//! Supports implicit equality on dotted field paths, nested field objects,
//! the comparison operators (`$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`),
//! membership (`$in`, `$nin`, `$elemMatch`, `$all`, `$size`), `$exists`, and the
//! combinators `$and`, `$or`, `$nor`, `$not`.

use std::cmp::Ordering;

use enseada_storage::{SortDirection, SortField, StorageError, StorageResult};
use serde_json::{Map, Value};

/// Returns `true` if `doc` satisfies `selector`.
pub fn matches(selector: &Value, doc: &Value) -> StorageResult<bool> {
    let Value::Object(clauses) = selector else {
        return Err(StorageError::invalid_query("selector must be an object"));
    };
    for (key, condition) in clauses {
        let ok = match key.as_str() {
            "$and" => all_of(condition, doc)?,
            "$or" => any_of(condition, doc)?,
            "$nor" => !any_of(condition, doc)?,
            "$not" => !matches(condition, doc)?,
            op if op.starts_with('$') => {
                return Err(StorageError::invalid_query(format!(
                    "unsupported combinator {op}"
                )));
            }
            path => match_condition(lookup(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn selectors(condition: &Value) -> StorageResult<&Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| StorageError::invalid_query("combinator argument must be an array"))
}

fn all_of(condition: &Value, doc: &Value) -> StorageResult<bool> {
    for selector in selectors(condition)? {
        if !matches(selector, doc)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(condition: &Value, doc: &Value) -> StorageResult<bool> {
    for selector in selectors(condition)? {
        if matches(selector, doc)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolves a dot separated field path.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn match_condition(value: Option<&Value>, condition: &Value) -> StorageResult<bool> {
    match condition {
        Value::Object(ops) if is_operator_object(ops) => {
            for (op, arg) in ops {
                if !apply_operator(value, op, arg)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Value::Object(_) => match value {
            Some(nested @ Value::Object(_)) => matches(condition, nested),
            _ => Ok(false),
        },
        expected => Ok(value == Some(expected)),
    }
}

fn apply_operator(value: Option<&Value>, op: &str, arg: &Value) -> StorageResult<bool> {
    if op == "$exists" {
        let want = arg
            .as_bool()
            .ok_or_else(|| StorageError::invalid_query("$exists expects a boolean"))?;
        return Ok(value.is_some() == want);
    }
    if op == "$not" {
        return Ok(!match_condition(value, arg)?);
    }

    // Every other operator requires the field to be present.
    let Some(value) = value else {
        return Ok(false);
    };

    let result = match op {
        "$eq" => value == arg,
        "$ne" => value != arg,
        "$gt" => collate(value, arg) == Ordering::Greater,
        "$gte" => collate(value, arg) != Ordering::Less,
        "$lt" => collate(value, arg) == Ordering::Less,
        "$lte" => collate(value, arg) != Ordering::Greater,
        "$in" => operand_array(op, arg)?.contains(value),
        "$nin" => !operand_array(op, arg)?.contains(value),
        "$all" => match value {
            Value::Array(items) => operand_array(op, arg)?.iter().all(|a| items.contains(a)),
            _ => false,
        },
        "$size" => {
            let size = arg
                .as_u64()
                .ok_or_else(|| StorageError::invalid_query("$size expects an integer"))?;
            matches!(value, Value::Array(items) if items.len() as u64 == size)
        }
        "$elemMatch" => match value {
            Value::Array(items) => {
                let mut any = false;
                for item in items {
                    if elem_matches(item, arg)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            _ => false,
        },
        other => {
            return Err(StorageError::invalid_query(format!(
                "unsupported operator {other}"
            )));
        }
    };
    Ok(result)
}

fn elem_matches(item: &Value, arg: &Value) -> StorageResult<bool> {
    match arg {
        Value::Object(ops) if is_operator_object(ops) => match_condition(Some(item), arg),
        Value::Object(_) => matches(arg, item),
        expected => Ok(item == expected),
    }
}

fn operand_array<'a>(op: &str, arg: &'a Value) -> StorageResult<&'a Vec<Value>> {
    arg.as_array()
        .ok_or_else(|| StorageError::invalid_query(format!("{op} expects an array")))
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Orders values by type first (null < booleans < numbers < strings < arrays < objects).
pub fn collate(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| collate(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => Ordering::Equal,
    }
}

/// Sorts documents in place by the given fields; missing fields sort first.
pub fn sort_documents(docs: &mut [Value], sort: &[SortField]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for field in sort {
            let left = lookup(a, &field.field).unwrap_or(&Value::Null);
            let right = lookup(b, &field.field).unwrap_or(&Value::Null);
            let order = match field.direction {
                SortDirection::Asc => collate(left, right),
                SortDirection::Desc => collate(right, left),
            };
            if order != Ordering::Equal {
                return order;
            }
        }
        Ordering::Equal
    });
}

/// Keeps only the listed (possibly dotted) fields of a document.
pub fn project(doc: &Value, fields: &[String]) -> Value {
    let mut out = Map::new();
    for path in fields {
        if let Some(value) = lookup(doc, path) {
            let segments: Vec<&str> = path.split('.').collect();
            insert_path(&mut out, &segments, value.clone());
        }
    }
    Value::Object(out)
}

fn insert_path(target: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert((*last).to_string(), value);
        }
        [first, rest @ ..] => {
            let entry = target
                .entry((*first).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}
