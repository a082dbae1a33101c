//! In-memory document store.
//!
//! Used for tests and ephemeral tenants. All data is lost when dropped.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::doc::{
    DocStore, Query, Reduce, Selector, check_bulk_len, doc_id, doc_rev, next_rev, sort_docs,
};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
struct StoredDoc {
    body: Value,
    conflicts: Vec<String>,
}

impl StoredDoc {
    fn rev(&self) -> &str {
        doc_rev(&self.body).unwrap_or_default()
    }

    fn to_value(&self) -> Value {
        let mut body = self.body.clone();
        if !self.conflicts.is_empty()
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("_conflicts".into(), Value::from(self.conflicts.clone()));
        }
        body
    }
}

type Table = BTreeMap<String, StoredDoc>;

/// In-memory MVCC document store.
///
/// Thread-safe via internal `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryDocStore {
    tables: RwLock<HashMap<String, Table>>,
    failing_writes: AtomicUsize,
}

impl MemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a losing revision for a document, as a replicated store would
    /// after concurrent edits.
    pub fn inject_conflict(&self, doctype: &str, id: &str, rev: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let stored = tables
            .get_mut(doctype)
            .and_then(|t| t.get_mut(id))
            .ok_or_else(|| StoreError::not_found(id))?;
        stored.conflicts.push(rev.to_string());
        Ok(())
    }

    /// Make the next `count` bulk writes fail with a transient error.
    pub fn fail_next_bulk_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> StoreResult<()> {
        let took = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if took.is_ok() {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

fn required_id(doc: &Value) -> StoreResult<String> {
    match doc_id(doc) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(StoreError::bad_request("document has no _id")),
    }
}

fn set_rev(doc: &mut Value, rev: &str) -> StoreResult<()> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::bad_request("document is not an object"))?;
    obj.insert("_rev".into(), Value::String(rev.to_string()));
    obj.remove("_conflicts");
    Ok(())
}

/// Check one write against the table; returns the previous revision.
fn check_write(table: &Table, doc: &Value) -> StoreResult<(String, String)> {
    let id = required_id(doc)?;
    match (table.get(&id), doc_rev(doc)) {
        (Some(stored), Some(rev)) if stored.rev() == rev => Ok((id, rev.to_string())),
        (Some(_), _) => Err(StoreError::conflict(format!("document update conflict: {id}"))),
        (None, Some(_)) => Err(StoreError::not_found(id)),
        (None, None) => Ok((id, String::new())),
    }
}

#[async_trait]
impl DocStore for MemoryDocStore {
    async fn get(&self, doctype: &str, id: &str) -> StoreResult<Value> {
        let tables = self.tables.read();
        tables
            .get(doctype)
            .and_then(|t| t.get(id))
            .map(StoredDoc::to_value)
            .ok_or_else(|| StoreError::not_found(format!("{doctype}/{id}")))
    }

    async fn create(&self, doctype: &str, mut doc: Value) -> StoreResult<String> {
        let id = required_id(&doc)?;
        let mut tables = self.tables.write();
        let table = tables.entry(doctype.to_string()).or_default();
        if table.contains_key(&id) {
            return Err(StoreError::conflict(format!("document already exists: {id}")));
        }
        let rev = next_rev("");
        set_rev(&mut doc, &rev)?;
        table.insert(
            id,
            StoredDoc {
                body: doc,
                conflicts: Vec::new(),
            },
        );
        Ok(rev)
    }

    async fn update(&self, doctype: &str, mut doc: Value) -> StoreResult<String> {
        let mut tables = self.tables.write();
        let table = tables.entry(doctype.to_string()).or_default();
        let (id, prev) = check_write(table, &doc)?;
        if prev.is_empty() {
            return Err(StoreError::not_found(id));
        }
        let rev = next_rev(&prev);
        set_rev(&mut doc, &rev)?;
        if let Some(stored) = table.get_mut(&id) {
            stored.body = doc;
        }
        Ok(rev)
    }

    async fn delete(&self, doctype: &str, id: &str, rev: &str) -> StoreResult<()> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(doctype)
            .ok_or_else(|| StoreError::not_found(id))?;
        match table.get(id) {
            None => Err(StoreError::not_found(id)),
            Some(stored) if stored.rev() != rev => {
                Err(StoreError::conflict(format!("document delete conflict: {id}")))
            }
            Some(_) => {
                table.remove(id);
                Ok(())
            }
        }
    }

    async fn bulk_update(&self, doctype: &str, docs: Vec<Value>) -> StoreResult<Vec<String>> {
        check_bulk_len(docs.len())?;
        self.maybe_fail()?;
        let mut tables = self.tables.write();
        let table = tables.entry(doctype.to_string()).or_default();
        let mut checked = Vec::with_capacity(docs.len());
        for doc in &docs {
            checked.push(check_write(table, doc)?);
        }
        let mut revs = Vec::with_capacity(docs.len());
        for (mut doc, (id, prev)) in docs.into_iter().zip(checked) {
            let rev = next_rev(&prev);
            set_rev(&mut doc, &rev)?;
            let stored = table.entry(id).or_insert_with(|| StoredDoc {
                body: Value::Null,
                conflicts: Vec::new(),
            });
            stored.body = doc;
            revs.push(rev);
        }
        Ok(revs)
    }

    async fn bulk_delete(&self, doctype: &str, docs: Vec<(String, String)>) -> StoreResult<()> {
        check_bulk_len(docs.len())?;
        self.maybe_fail()?;
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(doctype) else {
            return if docs.is_empty() {
                Ok(())
            } else {
                Err(StoreError::not_found(doctype))
            };
        };
        for (id, rev) in &docs {
            match table.get(id) {
                None => return Err(StoreError::not_found(id.as_str())),
                Some(stored) if stored.rev() != rev => {
                    return Err(StoreError::conflict(format!("document delete conflict: {id}")));
                }
                Some(_) => {}
            }
        }
        for (id, _) in docs {
            table.remove(&id);
        }
        Ok(())
    }

    async fn find(&self, doctype: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let mut docs: Vec<Value> = {
            let tables = self.tables.read();
            match tables.get(doctype) {
                Some(table) => table
                    .values()
                    .filter(|d| query.selector.matches(&d.body))
                    .map(|d| d.body.clone())
                    .collect(),
                None => Vec::new(),
            }
        };
        sort_docs(&mut docs, query.sort.as_ref());
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(docs.into_iter().skip(query.skip).take(limit).collect())
    }

    async fn reduce(
        &self,
        doctype: &str,
        selector: &Selector,
        reduce: &Reduce,
    ) -> StoreResult<Value> {
        let tables = self.tables.read();
        let Some(table) = tables.get(doctype) else {
            return Ok(Value::from(0));
        };
        let matching = table.values().filter(|d| selector.matches(&d.body));
        Ok(match reduce {
            Reduce::Count => Value::from(matching.count() as u64),
            Reduce::Sum(field) => Value::from(
                matching
                    .filter_map(|d| d.body.get(field).and_then(Value::as_u64))
                    .sum::<u64>(),
            ),
        })
    }

    async fn all_docs(&self, doctype: &str, skip: usize, limit: usize) -> StoreResult<Vec<Value>> {
        let tables = self.tables.read();
        Ok(match tables.get(doctype) {
            Some(table) => table
                .values()
                .skip(skip)
                .take(limit)
                .map(StoredDoc::to_value)
                .collect(),
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DT: &str = "io.cozy.files";

    #[tokio::test]
    async fn test_create_get_update() {
        let store = MemoryDocStore::new();
        let rev = store.create(DT, json!({"_id": "a", "size": 1})).await.unwrap();
        let doc = store.get(DT, "a").await.unwrap();
        assert_eq!(doc["_rev"], json!(rev));

        let rev2 = store
            .update(DT, json!({"_id": "a", "_rev": rev, "size": 2}))
            .await
            .unwrap();
        assert!(rev2.starts_with("2-"));
        assert_eq!(store.get(DT, "a").await.unwrap()["size"], json!(2));
    }

    #[tokio::test]
    async fn test_stale_rev_conflicts() {
        let store = MemoryDocStore::new();
        let rev = store.create(DT, json!({"_id": "a"})).await.unwrap();
        store.update(DT, json!({"_id": "a", "_rev": rev})).await.unwrap();
        let err = store.update(DT, json!({"_id": "a", "_rev": rev})).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.delete(DT, "a", &rev).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let store = MemoryDocStore::new();
        store.create(DT, json!({"_id": "a"})).await.unwrap();
        assert!(matches!(
            store.create(DT, json!({"_id": "a"})).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_bulk_update_is_all_or_nothing() {
        let store = MemoryDocStore::new();
        let ra = store.create(DT, json!({"_id": "a", "v": 0})).await.unwrap();
        store.create(DT, json!({"_id": "b", "v": 0})).await.unwrap();
        let err = store
            .bulk_update(
                DT,
                vec![
                    json!({"_id": "a", "_rev": ra, "v": 1}),
                    json!({"_id": "b", "_rev": "9-stale", "v": 1}),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get(DT, "a").await.unwrap()["v"], json!(0));
    }

    #[tokio::test]
    async fn test_bulk_limit() {
        let store = MemoryDocStore::new();
        let docs = (0..=crate::doc::MAX_BULK).map(|i| json!({"_id": i.to_string()})).collect();
        assert!(matches!(
            store.bulk_update(DT, docs).await,
            Err(StoreError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_is_transient_and_consumed() {
        let store = MemoryDocStore::new();
        store.fail_next_bulk_writes(1);
        let err = store.bulk_delete(DT, vec![]).await.unwrap_err();
        assert!(err.is_transient());
        store.bulk_delete(DT, vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_sort_and_page() {
        let store = MemoryDocStore::new();
        for (id, name) in [("1", "c"), ("2", "a"), ("3", "b")] {
            store
                .create(DT, json!({"_id": id, "dir_id": "d", "name": name}))
                .await
                .unwrap();
        }
        let q = Query::new(Selector::equals("dir_id", "d")).sort_by("name").skip(1).limit(1);
        let docs = store.find(DT, &q).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["name"], json!("b"));
    }

    #[tokio::test]
    async fn test_reduce() {
        let store = MemoryDocStore::new();
        store.create(DT, json!({"_id": "a", "type": "file", "size": 3})).await.unwrap();
        store.create(DT, json!({"_id": "b", "type": "file", "size": 4})).await.unwrap();
        store.create(DT, json!({"_id": "c", "type": "directory"})).await.unwrap();
        let files = Selector::equals("type", "file");
        assert_eq!(
            store.reduce(DT, &files, &Reduce::Sum("size".into())).await.unwrap(),
            json!(7)
        );
        assert_eq!(store.reduce(DT, &Selector::All, &Reduce::Count).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_conflicts_are_reported() {
        let store = MemoryDocStore::new();
        store.create(DT, json!({"_id": "a"})).await.unwrap();
        store.inject_conflict(DT, "a", "1-loser").unwrap();
        let doc = store.get(DT, "a").await.unwrap();
        assert_eq!(doc["_conflicts"], json!(["1-loser"]));
        let all = store.all_docs(DT, 0, 10).await.unwrap();
        assert_eq!(all[0]["_conflicts"], json!(["1-loser"]));
    }
}
