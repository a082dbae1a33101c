//! Document store contract.
//!
//! Documents are JSON objects carrying `_id` and `_rev`. A revision is
//! `"<generation>-<random>"`; every successful write mints a new one and
//! writes against a stale revision fail with [`StoreError::Conflict`].
//! Documents are partitioned by doctype (`io.cozy.files`,
//! `io.cozy.files.versions`, ...).

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;

use crate::error::{StoreError, StoreResult};

/// Largest accepted bulk write.
pub const MAX_BULK: usize = 1000;

/// Mint the revision following `prev` (empty for a new document).
pub fn next_rev(prev: &str) -> String {
    let generation = prev
        .split_once('-')
        .and_then(|(n, _)| n.parse::<u64>().ok())
        .unwrap_or(0);
    let mut tail = uuid::Uuid::new_v4().simple().to_string();
    tail.truncate(16);
    format!("{}-{tail}", generation + 1)
}

/// Read `_id` from a document.
pub fn doc_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

/// Read `_rev` from a document.
pub fn doc_rev(doc: &Value) -> Option<&str> {
    doc.get("_rev").and_then(Value::as_str)
}

/// Query predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// Every document.
    All,
    /// `field == value`.
    Eq(String, Value),
    /// `field` equals one of the values.
    In(String, Vec<Value>),
    /// `gt < field < lt`, bounds exclusive and optional.
    Range {
        field: String,
        gt: Option<Value>,
        lt: Option<Value>,
    },
    /// Every sub-selector matches.
    And(Vec<Selector>),
}

impl Selector {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Selector::Eq(field.into(), value.into())
    }

    pub fn range(field: impl Into<String>, gt: Option<Value>, lt: Option<Value>) -> Self {
        Selector::Range {
            field: field.into(),
            gt,
            lt,
        }
    }

    pub fn and(self, other: Selector) -> Self {
        match self {
            Selector::And(mut parts) => {
                parts.push(other);
                Selector::And(parts)
            }
            Selector::All => other,
            s => Selector::And(vec![s, other]),
        }
    }

    /// Evaluate the selector against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Selector::All => true,
            Selector::Eq(field, value) => doc.get(field).unwrap_or(&Value::Null) == value,
            Selector::In(field, values) => {
                let v = doc.get(field).unwrap_or(&Value::Null);
                values.iter().any(|x| x == v)
            }
            Selector::Range { field, gt, lt } => {
                let Some(v) = doc.get(field) else {
                    return false;
                };
                let above = gt
                    .as_ref()
                    .is_none_or(|g| compare_values(v, g) == Some(Ordering::Greater));
                let below = lt
                    .as_ref()
                    .is_none_or(|l| compare_values(v, l) == Some(Ordering::Less));
                above && below
            }
            Selector::And(parts) => parts.iter().all(|s| s.matches(doc)),
        }
    }
}

/// Compare two JSON scalars of the same kind. Strings compare bytewise.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// A selector query with sort and pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selector: Selector,
    /// Field to sort on; ties and unsorted results order by `_id`.
    pub sort: Option<(String, SortOrder)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            sort: None,
            skip: 0,
            limit: None,
        }
    }

    pub fn sort_by(mut self, field: impl Into<String>) -> Self {
        self.sort = Some((field.into(), SortOrder::Asc));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregation over the documents matching a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduce {
    /// Sum of a numeric field; documents without it count as 0.
    Sum(String),
    /// Number of matching documents.
    Count,
}

/// MVCC JSON document store.
///
/// `get` and `all_docs` include a `_conflicts` array of losing revisions
/// when the store holds any for a document.
#[async_trait]
pub trait DocStore: Send + Sync {
    // ========================================================================
    // Single documents
    // ========================================================================

    /// Fetch a document by id.
    async fn get(&self, doctype: &str, id: &str) -> StoreResult<Value>;

    /// Insert a new document, returning its revision.
    ///
    /// The document must carry `_id`. An existing id is a conflict.
    async fn create(&self, doctype: &str, doc: Value) -> StoreResult<String>;

    /// Replace a document. `_rev` must match the stored revision.
    async fn update(&self, doctype: &str, doc: Value) -> StoreResult<String>;

    /// Delete a document at a revision.
    async fn delete(&self, doctype: &str, id: &str, rev: &str) -> StoreResult<()>;

    // ========================================================================
    // Bulk
    // ========================================================================

    /// Replace many documents at once, all or nothing.
    ///
    /// Every document must carry a matching `_rev`. At most [`MAX_BULK`].
    /// Returns the new revisions in input order.
    async fn bulk_update(&self, doctype: &str, docs: Vec<Value>) -> StoreResult<Vec<String>>;

    /// Delete many `(id, rev)` pairs at once, all or nothing.
    async fn bulk_delete(&self, doctype: &str, docs: Vec<(String, String)>) -> StoreResult<()>;

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run a selector query.
    async fn find(&self, doctype: &str, query: &Query) -> StoreResult<Vec<Value>>;

    /// Aggregate the documents matching `selector`.
    ///
    /// Returns a JSON number.
    async fn reduce(&self, doctype: &str, selector: &Selector, reduce: &Reduce)
    -> StoreResult<Value>;

    /// Page through every document of a doctype, ordered by id.
    async fn all_docs(&self, doctype: &str, skip: usize, limit: usize) -> StoreResult<Vec<Value>>;
}

/// Check a bulk request against [`MAX_BULK`].
pub(crate) fn check_bulk_len(len: usize) -> StoreResult<()> {
    if len > MAX_BULK {
        return Err(StoreError::bad_request(format!(
            "bulk of {len} documents exceeds the {MAX_BULK} limit"
        )));
    }
    Ok(())
}

/// Sort query results in place.
pub(crate) fn sort_docs(docs: &mut [Value], sort: Option<&(String, SortOrder)>) {
    docs.sort_by(|a, b| {
        let by_field = match sort {
            Some((field, order)) => {
                let av = a.get(field).unwrap_or(&Value::Null);
                let bv = b.get(field).unwrap_or(&Value::Null);
                let o = compare_values(av, bv).unwrap_or(Ordering::Equal);
                if *order == SortOrder::Desc { o.reverse() } else { o }
            }
            None => Ordering::Equal,
        };
        by_field.then_with(|| doc_id(a).cmp(&doc_id(b)))
    });
}
