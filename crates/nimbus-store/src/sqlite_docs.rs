//! SQLite-backed document store.
//!
//! One `docs` table holds every doctype. Bodies are JSON text; selectors
//! compile to `json_extract` predicates, and the two lookups the VFS runs
//! constantly (children of a directory, directory by path) have matching
//! expression indexes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::doc::{
    DocStore, Query, Reduce, Selector, SortOrder, check_bulk_len, doc_id, doc_rev, next_rev,
};
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS docs (
    doctype TEXT NOT NULL,
    id TEXT NOT NULL,
    rev TEXT NOT NULL,
    body TEXT NOT NULL,
    conflicts TEXT NOT NULL DEFAULT '[]',
    PRIMARY KEY (doctype, id)
);

CREATE INDEX IF NOT EXISTS idx_docs_children
    ON docs(doctype, json_extract(body, '$.dir_id'), json_extract(body, '$.name'));

CREATE INDEX IF NOT EXISTS idx_docs_path
    ON docs(doctype, json_extract(body, '$.path'));
"#;

/// Document store persisted in a SQLite database.
#[derive(Clone)]
pub struct SqliteDocStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record a losing revision for a document.
    pub fn inject_conflict(&self, doctype: &str, id: &str, rev: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let conflicts: Option<String> = conn
            .query_row(
                "SELECT conflicts FROM docs WHERE doctype = ?1 AND id = ?2",
                params![doctype, id],
                |row| row.get(0),
            )
            .optional()?;
        let conflicts = conflicts.ok_or_else(|| StoreError::not_found(id))?;
        let mut list: Vec<String> = serde_json::from_str(&conflicts)?;
        list.push(rev.to_string());
        conn.execute(
            "UPDATE docs SET conflicts = ?3 WHERE doctype = ?1 AND id = ?2",
            params![doctype, id, serde_json::to_string(&list)?],
        )?;
        Ok(())
    }
}

/// Field reference usable inside SQL text.
fn field_expr(field: &str) -> StoreResult<String> {
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StoreError::bad_request(format!("unsupported field: {field:?}")));
    }
    Ok(format!("json_extract(body, '$.{field}')"))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::from(0),
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => Value::from(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::from(b),
    }
}

/// Compile a selector into a SQL predicate, pushing bound parameters.
fn selector_sql(selector: &Selector, params: &mut Vec<SqlValue>) -> StoreResult<String> {
    Ok(match selector {
        Selector::All => "1".to_string(),
        Selector::Eq(field, Value::Null) => format!("{} IS NULL", field_expr(field)?),
        Selector::Eq(field, value) => {
            params.push(to_sql(value));
            format!("{} = ?", field_expr(field)?)
        }
        Selector::In(field, values) => {
            if values.is_empty() {
                return Ok("0".to_string());
            }
            let marks = vec!["?"; values.len()].join(", ");
            params.extend(values.iter().map(to_sql));
            format!("{} IN ({marks})", field_expr(field)?)
        }
        Selector::Range { field, gt, lt } => {
            let expr = field_expr(field)?;
            let mut parts = vec![format!("{expr} IS NOT NULL")];
            if let Some(gt) = gt {
                params.push(to_sql(gt));
                parts.push(format!("{expr} > ?"));
            }
            if let Some(lt) = lt {
                params.push(to_sql(lt));
                parts.push(format!("{expr} < ?"));
            }
            parts.join(" AND ")
        }
        Selector::And(parts) => {
            let mut out = Vec::with_capacity(parts.len());
            for part in parts {
                out.push(format!("({})", selector_sql(part, params)?));
            }
            if out.is_empty() {
                "1".to_string()
            } else {
                out.join(" AND ")
            }
        }
    })
}

fn with_conflicts(body: &str, conflicts: &str) -> StoreResult<Value> {
    let mut doc: Value = serde_json::from_str(body)?;
    let list: Vec<String> = serde_json::from_str(conflicts)?;
    if !list.is_empty()
        && let Some(obj) = doc.as_object_mut()
    {
        obj.insert("_conflicts".into(), Value::from(list));
    }
    Ok(doc)
}

fn prepare_body(doc: &mut Value, rev: &str) -> StoreResult<String> {
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::bad_request("document is not an object"))?;
    obj.insert("_rev".into(), Value::String(rev.to_string()));
    obj.remove("_conflicts");
    Ok(serde_json::to_string(doc)?)
}

fn required_id(doc: &Value) -> StoreResult<String> {
    match doc_id(doc) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(StoreError::bad_request("document has no _id")),
    }
}

fn current_rev(conn: &Connection, doctype: &str, id: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT rev FROM docs WHERE doctype = ?1 AND id = ?2",
            params![doctype, id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Validate a write and return `(id, previous rev)`; empty rev for inserts.
fn check_write(conn: &Connection, doctype: &str, doc: &Value) -> StoreResult<(String, String)> {
    let id = required_id(doc)?;
    match (current_rev(conn, doctype, &id)?, doc_rev(doc)) {
        (Some(stored), Some(rev)) if stored == rev => Ok((id, stored)),
        (Some(_), _) => Err(StoreError::conflict(format!("document update conflict: {id}"))),
        (None, Some(_)) => Err(StoreError::not_found(id)),
        (None, None) => Ok((id, String::new())),
    }
}

fn upsert(conn: &Connection, doctype: &str, id: &str, rev: &str, body: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO docs (doctype, id, rev, body) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(doctype, id) DO UPDATE SET rev = excluded.rev, body = excluded.body",
        params![doctype, id, rev, body],
    )?;
    Ok(())
}

#[async_trait]
impl DocStore for SqliteDocStore {
    async fn get(&self, doctype: &str, id: &str) -> StoreResult<Value> {
        let conn = self.conn.lock();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT body, conflicts FROM docs WHERE doctype = ?1 AND id = ?2",
                params![doctype, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((body, conflicts)) => with_conflicts(&body, &conflicts),
            None => Err(StoreError::not_found(format!("{doctype}/{id}"))),
        }
    }

    async fn create(&self, doctype: &str, mut doc: Value) -> StoreResult<String> {
        let id = required_id(&doc)?;
        let conn = self.conn.lock();
        if current_rev(&conn, doctype, &id)?.is_some() {
            return Err(StoreError::conflict(format!("document already exists: {id}")));
        }
        let rev = next_rev("");
        let body = prepare_body(&mut doc, &rev)?;
        upsert(&conn, doctype, &id, &rev, &body)?;
        Ok(rev)
    }

    async fn update(&self, doctype: &str, mut doc: Value) -> StoreResult<String> {
        let conn = self.conn.lock();
        let (id, prev) = check_write(&conn, doctype, &doc)?;
        if prev.is_empty() {
            return Err(StoreError::not_found(id));
        }
        let rev = next_rev(&prev);
        let body = prepare_body(&mut doc, &rev)?;
        upsert(&conn, doctype, &id, &rev, &body)?;
        Ok(rev)
    }

    async fn delete(&self, doctype: &str, id: &str, rev: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        match current_rev(&conn, doctype, id)? {
            None => Err(StoreError::not_found(id)),
            Some(stored) if stored != rev => {
                Err(StoreError::conflict(format!("document delete conflict: {id}")))
            }
            Some(_) => {
                conn.execute(
                    "DELETE FROM docs WHERE doctype = ?1 AND id = ?2",
                    params![doctype, id],
                )?;
                Ok(())
            }
        }
    }

    async fn bulk_update(&self, doctype: &str, docs: Vec<Value>) -> StoreResult<Vec<String>> {
        check_bulk_len(docs.len())?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut revs = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let (id, prev) = check_write(&tx, doctype, &doc)?;
            let rev = next_rev(&prev);
            let body = prepare_body(&mut doc, &rev)?;
            upsert(&tx, doctype, &id, &rev, &body)?;
            revs.push(rev);
        }
        tx.commit()?;
        Ok(revs)
    }

    async fn bulk_delete(&self, doctype: &str, docs: Vec<(String, String)>) -> StoreResult<()> {
        check_bulk_len(docs.len())?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (id, rev) in &docs {
            match current_rev(&tx, doctype, id)? {
                None => return Err(StoreError::not_found(id.as_str())),
                Some(stored) if &stored != rev => {
                    return Err(StoreError::conflict(format!("document delete conflict: {id}")));
                }
                Some(_) => {
                    tx.execute(
                        "DELETE FROM docs WHERE doctype = ?1 AND id = ?2",
                        params![doctype, id],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn find(&self, doctype: &str, query: &Query) -> StoreResult<Vec<Value>> {
        let mut params = vec![SqlValue::Text(doctype.to_string())];
        let predicate = selector_sql(&query.selector, &mut params)?;
        let order = match &query.sort {
            Some((field, dir)) => {
                let dir = if *dir == SortOrder::Desc { "DESC" } else { "ASC" };
                format!("{} {dir}, id ASC", field_expr(field)?)
            }
            None => "id ASC".to_string(),
        };
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        params.push(SqlValue::Integer(limit));
        params.push(SqlValue::Integer(query.skip as i64));
        let sql = format!(
            "SELECT body FROM docs WHERE doctype = ? AND ({predicate}) ORDER BY {order} LIMIT ? OFFSET ?"
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;
        let mut docs = Vec::new();
        for body in rows {
            docs.push(serde_json::from_str(&body?)?);
        }
        Ok(docs)
    }

    async fn reduce(
        &self,
        doctype: &str,
        selector: &Selector,
        reduce: &Reduce,
    ) -> StoreResult<Value> {
        let mut params = vec![SqlValue::Text(doctype.to_string())];
        let predicate = selector_sql(selector, &mut params)?;
        let aggregate = match reduce {
            Reduce::Count => "COUNT(*)".to_string(),
            Reduce::Sum(field) => format!("COALESCE(SUM({}), 0)", field_expr(field)?),
        };
        let sql = format!("SELECT {aggregate} FROM docs WHERE doctype = ? AND ({predicate})");
        let conn = self.conn.lock();
        let value: SqlValue =
            conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(from_sql(value))
    }

    async fn all_docs(&self, doctype: &str, skip: usize, limit: usize) -> StoreResult<Vec<Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body, conflicts FROM docs WHERE doctype = ?1 ORDER BY id LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![doctype, limit as i64, skip as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut docs = Vec::new();
        for row in rows {
            let (body, conflicts) = row?;
            docs.push(with_conflicts(&body, &conflicts)?);
        }
        Ok(docs)
    }
}
