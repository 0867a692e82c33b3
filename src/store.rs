//! Document-store collaborator.
//!
//! Capsules and user records are persisted through [`DocumentStore`], a
//! narrow interface over a JSON document database. [`MemoryStore`] is the
//! in-process implementation used by tests and the demo.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{VaultError, VaultResult};

/// Collection names.
pub mod collections {
    pub const CAPSULES: &str = "capsules";
    pub const USERS: &str = "users";
}

/// An equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn accepts(&self, record: &Value) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// Sort order for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A record together with its document id.
pub type Document = (String, Value);

/// Persistence collaborator.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a record under a store-assigned id and return the id.
    async fn create(&self, collection: &str, record: Value) -> VaultResult<String>;

    /// Insert or replace a record under a caller-chosen id.
    async fn set(&self, collection: &str, id: &str, record: Value) -> VaultResult<()>;

    /// Fetch one record, `None` if absent.
    async fn get(&self, collection: &str, id: &str) -> VaultResult<Option<Value>>;

    /// All records matching every filter, optionally ordered.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<&OrderBy>,
    ) -> VaultResult<Vec<Document>>;

    /// Merge `fields` (a JSON object) into an existing record.
    async fn update(&self, collection: &str, id: &str, fields: Value) -> VaultResult<()>;
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_collections<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeMap<String, Value>>) -> VaultResult<T>,
    ) -> VaultResult<T> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| VaultError::Store("memory store poisoned".into()))?;
        f(&mut guard)
    }

    fn allocate_id(&self) -> String {
        format!("doc-{:06}", self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1)
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn require_object(fields: Value) -> VaultResult<Map<String, Value>> {
    match fields {
        Value::Object(map) => Ok(map),
        _ => Err(VaultError::Store("record must be a JSON object".into())),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, record: Value) -> VaultResult<String> {
        let record = Value::Object(require_object(record)?);
        let id = self.allocate_id();
        self.with_collections(|cols| {
            cols.entry(collection.to_string())
                .or_default()
                .insert(id.clone(), record);
            Ok(())
        })?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, record: Value) -> VaultResult<()> {
        let record = Value::Object(require_object(record)?);
        self.with_collections(|cols| {
            cols.entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), record);
            Ok(())
        })
    }

    async fn get(&self, collection: &str, id: &str) -> VaultResult<Option<Value>> {
        self.with_collections(|cols| {
            Ok(cols.get(collection).and_then(|docs| docs.get(id)).cloned())
        })
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order: Option<&OrderBy>,
    ) -> VaultResult<Vec<Document>> {
        let mut matches: Vec<Document> = self.with_collections(|cols| {
            Ok(cols
                .get(collection)
                .map(|docs| {
                    docs.iter()
                        .filter(|(_, record)| filters.iter().all(|f| f.accepts(record)))
                        .map(|(id, record)| (id.clone(), record.clone()))
                        .collect()
                })
                .unwrap_or_default())
        })?;

        if let Some(order) = order {
            matches.sort_by(|(_, a), (_, b)| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(matches)
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> VaultResult<()> {
        let fields = require_object(fields)?;
        self.with_collections(|cols| {
            let record = cols
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| VaultError::NotFound(format!("{collection}/{id}")))?;
            if let Value::Object(existing) = record {
                existing.extend(fields);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_get_update() {
        let store = MemoryStore::new();
        let id = store
            .create("things", json!({"name": "a", "status": "sealed"}))
            .await
            .unwrap();
        store
            .update("things", &id, json!({"status": "opened"}))
            .await
            .unwrap();
        let record = store.get("things", &id).await.unwrap().unwrap();
        assert_eq!(record["status"], json!("opened"));
        assert_eq!(record["name"], json!("a"));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = MemoryStore::new();
        let a = store.create("c", json!({})).await.unwrap();
        let b = store.create("c", json!({})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("things", "nope", json!({"x": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = MemoryStore::new();
        store.set("c", "1", json!({"owner": "a", "rank": 2})).await.unwrap();
        store.set("c", "2", json!({"owner": "b", "rank": 5})).await.unwrap();
        store.set("c", "3", json!({"owner": "a", "rank": 9})).await.unwrap();

        let found = store
            .query("c", &[Filter::eq("owner", "a")], Some(&OrderBy::desc("rank")))
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, ["3", "1"]);

        let asc = store.query("c", &[], Some(&OrderBy::asc("rank"))).await.unwrap();
        assert_eq!(asc.first().map(|(id, _)| id.as_str()), Some("1"));
    }

    #[tokio::test]
    async fn non_object_records_rejected() {
        let store = MemoryStore::new();
        assert!(store.create("c", json!([1, 2])).await.is_err());
    }
}
