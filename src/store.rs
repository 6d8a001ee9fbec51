use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE: &str = "schooldesk.sqlite3";

/// Store-level failures with stable wire codes. Everything above the adapter
/// reports these verbatim; nothing above it sees SQL.
#[derive(Debug, Clone)]
pub enum StoreError {
    Open(String),
    Query(String),
    Write(String),
    Tx(String),
    Serialize(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Open(_) => "store_open_failed",
            StoreError::Query(_) => "store_query_failed",
            StoreError::Write(_) => "store_write_failed",
            StoreError::Tx(_) => "store_tx_failed",
            StoreError::Serialize(_) => "store_serialize_failed",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StoreError::Open(m)
            | StoreError::Query(m)
            | StoreError::Write(m)
            | StoreError::Tx(m)
            | StoreError::Serialize(m) => m,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message())
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

impl Document {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(|v| v.as_str())
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.body.get(key).and_then(|v| v.as_f64())
    }

    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.body.get(key).and_then(|v| v.as_i64())
    }

    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.body.get(key).and_then(|v| v.as_bool())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Eq(&'static str, Value),
    Gte(&'static str, Value),
    Lte(&'static str, Value),
    In(&'static str, Vec<Value>),
}

#[derive(Debug, Clone)]
pub struct Query {
    pub collection: &'static str,
    pub filters: Vec<Filter>,
    pub order_by: Option<(&'static str, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: &'static str) -> Self {
        Query {
            collection,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &'static str, order: Order) -> Self {
        self.order_by = Some((field, order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone)]
pub enum BatchOp {
    Set {
        collection: &'static str,
        id: String,
        body: Value,
    },
    Update {
        collection: &'static str,
        id: String,
        patch: Value,
    },
    Delete {
        collection: &'static str,
        id: String,
    },
}

/// Document store over one workspace SQLite file. Collections are rows in a
/// single `documents` table; field filters go through JSON1 expressions so the
/// callers never touch SQL.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(workspace: &Path) -> anyhow::Result<Store> {
        std::fs::create_dir_all(workspace)?;
        let conn = Connection::open(workspace.join(DB_FILE))?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Store> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Store { conn })
    }

    /// Flush journaled pages into the main file before it is copied elsewhere.
    pub fn checkpoint(&self) {
        let _ = self.conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| StoreError::Query(e.to_string()))?;
        match body {
            Some(text) => Ok(Some(Document {
                id: id.to_string(),
                body: parse_body(&text)?,
            })),
            None => Ok(None),
        }
    }

    /// Insert a new document. With no explicit id a UUIDv4 is assigned;
    /// inserting over an existing id is a write error, use `set` to overwrite.
    pub fn create(
        &self,
        collection: &str,
        id: Option<&str>,
        body: &Value,
    ) -> Result<String, StoreError> {
        let id = id
            .map(|v| v.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let text = serialize_body(body)?;
        self.conn
            .execute(
                "INSERT INTO documents(collection, id, body) VALUES(?, ?, ?)",
                (collection, &id, &text),
            )
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(id)
    }

    /// Full overwrite, upsert semantics. Last write wins.
    pub fn set(&self, collection: &str, id: &str, body: &Value) -> Result<(), StoreError> {
        let text = serialize_body(body)?;
        self.conn
            .execute(
                "INSERT INTO documents(collection, id, body) VALUES(?, ?, ?)
                 ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
                (collection, id, &text),
            )
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    /// Shallow field merge into an existing document; a null in the patch
    /// clears the field. Returns false when the document does not exist.
    pub fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<bool, StoreError> {
        let Some(mut doc) = self.get(collection, id)? else {
            return Ok(false);
        };
        merge_patch(&mut doc.body, patch)?;
        self.set(collection, id, &doc.body)?;
        Ok(true)
    }

    pub fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM documents WHERE collection = ? AND id = ?",
                (collection, id),
            )
            .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(affected > 0)
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?");
        let mut binds: Vec<SqlValue> = vec![SqlValue::Text(query.collection.to_string())];

        for filter in &query.filters {
            match filter {
                Filter::Eq(field, value) => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{}') = ?", field));
                    binds.push(bind_value(value));
                }
                Filter::Gte(field, value) => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{}') >= ?", field));
                    binds.push(bind_value(value));
                }
                Filter::Lte(field, value) => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{}') <= ?", field));
                    binds.push(bind_value(value));
                }
                Filter::In(field, values) => {
                    let placeholders = std::iter::repeat("?")
                        .take(values.len().max(1))
                        .collect::<Vec<_>>()
                        .join(",");
                    sql.push_str(&format!(
                        " AND json_extract(body, '$.{}') IN ({})",
                        field, placeholders
                    ));
                    if values.is_empty() {
                        // IN () is a syntax error; bind one value that matches nothing.
                        binds.push(SqlValue::Null);
                    } else {
                        for value in values {
                            binds.push(bind_value(value));
                        }
                    }
                }
            }
        }

        if let Some((field, order)) = &query.order_by {
            sql.push_str(&format!(
                " ORDER BY json_extract(body, '$.{}') {}",
                field,
                match order {
                    Order::Asc => "ASC",
                    Order::Desc => "DESC",
                }
            ));
        } else {
            // Deterministic fallback so repeat queries return stable order.
            sql.push_str(" ORDER BY id");
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| StoreError::Query(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut docs = Vec::with_capacity(rows.len());
        for (id, text) in rows {
            docs.push(Document {
                id,
                body: parse_body(&text)?,
            });
        }
        Ok(docs)
    }

    /// Apply every op or none. Update of a missing document aborts the batch.
    pub fn apply_batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Tx(e.to_string()))?;

        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    body,
                } => {
                    let text = serialize_body(body)?;
                    tx.execute(
                        "INSERT INTO documents(collection, id, body) VALUES(?, ?, ?)
                         ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
                        (*collection, id, &text),
                    )
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                }
                BatchOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let existing: Option<String> = tx
                        .query_row(
                            "SELECT body FROM documents WHERE collection = ? AND id = ?",
                            (*collection, id),
                            |r| r.get(0),
                        )
                        .optional()
                        .map_err(|e| StoreError::Query(e.to_string()))?;
                    let Some(text) = existing else {
                        return Err(StoreError::Write(format!(
                            "batch update target missing: {}/{}",
                            collection, id
                        )));
                    };
                    let mut body = parse_body(&text)?;
                    merge_patch(&mut body, patch)?;
                    let text = serialize_body(&body)?;
                    tx.execute(
                        "UPDATE documents SET body = ? WHERE collection = ? AND id = ?",
                        (&text, *collection, id),
                    )
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                }
                BatchOp::Delete { collection, id } => {
                    tx.execute(
                        "DELETE FROM documents WHERE collection = ? AND id = ?",
                        (*collection, id),
                    )
                    .map_err(|e| StoreError::Write(e.to_string()))?;
                }
            }
        }

        tx.commit().map_err(|e| StoreError::Tx(e.to_string()))
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY(collection, id)
        )",
        [],
    )?;
    Ok(())
}

fn parse_body(text: &str) -> Result<Value, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serialize(e.to_string()))
}

fn serialize_body(body: &Value) -> Result<String, StoreError> {
    serde_json::to_string(body).map_err(|e| StoreError::Serialize(e.to_string()))
}

fn merge_patch(body: &mut Value, patch: &Value) -> Result<(), StoreError> {
    let Some(patch) = patch.as_object() else {
        return Err(StoreError::Serialize("patch must be a JSON object".into()));
    };
    let Some(obj) = body.as_object_mut() else {
        return Err(StoreError::Serialize(
            "document body must be a JSON object".into(),
        ));
    };
    for (key, value) in patch {
        if value.is_null() {
            obj.remove(key);
        } else {
            obj.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

fn bind_value(value: &Value) -> SqlValue {
    match value {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        // JSON1 surfaces booleans as 0/1.
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        _ => SqlValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_get_set_update_delete_roundtrip() {
        let store = Store::open_in_memory().expect("open store");

        let id = store
            .create("students", None, &json!({ "firstName": "Ada", "active": true }))
            .expect("create");
        assert!(!id.is_empty());

        let doc = store.get("students", &id).expect("get").expect("present");
        assert_eq!(doc.str_field("firstName"), Some("Ada"));
        assert_eq!(doc.bool_field("active"), Some(true));

        let updated = store
            .update("students", &id, &json!({ "firstName": "Grace", "track": null }))
            .expect("update");
        assert!(updated);
        let doc = store.get("students", &id).expect("get").expect("present");
        assert_eq!(doc.str_field("firstName"), Some("Grace"));

        store
            .set("students", &id, &json!({ "firstName": "Only" }))
            .expect("set");
        let doc = store.get("students", &id).expect("get").expect("present");
        assert!(doc.bool_field("active").is_none(), "set overwrites the body");

        assert!(store.delete("students", &id).expect("delete"));
        assert!(store.get("students", &id).expect("get").is_none());
        assert!(!store.delete("students", &id).expect("second delete"));
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create("classes", Some("jss1a"), &json!({ "name": "JSS 1A" }))
            .expect("first create");
        let dup = store.create("classes", Some("jss1a"), &json!({ "name": "again" }));
        assert!(dup.is_err());
    }

    #[test]
    fn update_missing_document_returns_false() {
        let store = Store::open_in_memory().expect("open store");
        let hit = store
            .update("students", "nope", &json!({ "active": false }))
            .expect("update");
        assert!(!hit);
    }

    #[test]
    fn query_filters_order_and_limit() {
        let store = Store::open_in_memory().expect("open store");
        for (id, score, term) in [
            ("r1", 12.0, "First Term"),
            ("r2", 18.0, "First Term"),
            ("r3", 9.0, "Second Term"),
            ("r4", 15.0, "First Term"),
        ] {
            store
                .create(
                    "results",
                    Some(id),
                    &json!({ "score": score, "term": term, "studentId": "s1" }),
                )
                .expect("create");
        }

        let docs = store
            .query(
                &Query::collection("results")
                    .filter(Filter::Eq("term", json!("First Term")))
                    .order_by("score", Order::Desc),
            )
            .expect("query");
        let scores: Vec<f64> = docs.iter().filter_map(|d| d.f64_field("score")).collect();
        assert_eq!(scores, vec![18.0, 15.0, 12.0]);

        let docs = store
            .query(
                &Query::collection("results")
                    .filter(Filter::Gte("score", json!(12.0)))
                    .filter(Filter::Lte("score", json!(15.0))),
            )
            .expect("query");
        assert_eq!(docs.len(), 2);

        let docs = store
            .query(
                &Query::collection("results")
                    .filter(Filter::In("id", vec![json!("ignored")]))
                    .limit(1),
            )
            .expect("query");
        assert!(docs.len() <= 1);

        let docs = store
            .query(
                &Query::collection("results")
                    .filter(Filter::Eq("term", json!("First Term")))
                    .limit(2),
            )
            .expect("query");
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn membership_filter_matches_listed_values_only() {
        let store = Store::open_in_memory().expect("open store");
        for (id, status) in [("a1", "present"), ("a2", "absent"), ("a3", "late")] {
            store
                .create("attendance", Some(id), &json!({ "status": status }))
                .expect("create");
        }
        let docs = store
            .query(&Query::collection("attendance").filter(Filter::In(
                "status",
                vec![json!("present"), json!("late")],
            )))
            .expect("query");
        assert_eq!(docs.len(), 2);

        let docs = store
            .query(&Query::collection("attendance").filter(Filter::In("status", vec![])))
            .expect("query");
        assert!(docs.is_empty(), "empty membership matches nothing");
    }

    #[test]
    fn batch_is_atomic_when_an_update_target_is_missing() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create("meritSummaries", Some("m1"), &json!({ "total": 10 }))
            .expect("create");

        let result = store.apply_batch(&[
            BatchOp::Set {
                collection: "meritRecords",
                id: "rec1".to_string(),
                body: json!({ "points": 5 }),
            },
            BatchOp::Update {
                collection: "meritSummaries",
                id: "missing".to_string(),
                patch: json!({ "total": 15 }),
            },
        ]);
        assert!(result.is_err());
        assert!(
            store
                .get("meritRecords", "rec1")
                .expect("get")
                .is_none(),
            "failed batch must not leave sibling writes"
        );
    }

    #[test]
    fn batch_applies_all_ops_in_order() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create("meritSummaries", Some("m1"), &json!({ "total": 10, "tier": "Bronze" }))
            .expect("create");

        store
            .apply_batch(&[
                BatchOp::Set {
                    collection: "meritRecords",
                    id: "rec1".to_string(),
                    body: json!({ "points": -4 }),
                },
                BatchOp::Update {
                    collection: "meritSummaries",
                    id: "m1".to_string(),
                    patch: json!({ "total": 6 }),
                },
                BatchOp::Delete {
                    collection: "meritRecords",
                    id: "stale".to_string(),
                },
            ])
            .expect("batch");

        let summary = store
            .get("meritSummaries", "m1")
            .expect("get")
            .expect("present");
        assert_eq!(summary.i64_field("total"), Some(6));
        assert_eq!(summary.str_field("tier"), Some("Bronze"));
    }
}
