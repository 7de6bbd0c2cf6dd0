//! Business document collections.
//!
//! The replication engine never interprets business documents beyond
//! their `_id`; it applies bulk operations, exports collections for
//! seeding, and looks up content blobs. That surface is this trait.
//! The in-memory implementation backs tests and is a faithful model of
//! the operation semantics: insert skips duplicates, replace/update
//! match on a flat filter, upsert inserts on miss.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use edumesh_core::{ContentId, TenantId, UserId};
use edumesh_replication::{BulkOp, Collection};

use crate::store::StoreError;

/// Outcome of applying one batch of bulk operations to a collection.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct BulkApplyResult {
    pub applied: usize,
    pub failed: usize,
}

impl BulkApplyResult {
    pub fn has_error(&self) -> bool {
        self.failed > 0
    }

    pub fn merge(&mut self, other: BulkApplyResult) {
        self.applied += other.applied;
        self.failed += other.failed;
    }
}

/// Scope of a seed export.
#[derive(Debug, Clone, Copy)]
pub struct ExportScope {
    pub tenant: TenantId,
    /// Retention cutoff: documents last touched before this moment are
    /// left out of the seed. Documents without an `updatedAt` field
    /// always travel.
    pub updated_since: Option<DateTime<Utc>>,
}

/// Access to the business collections, keyed by wire collection name.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply one batch of bulk operations to one collection.
    async fn apply(
        &self,
        collection: Collection,
        ops: &[BulkOp],
    ) -> Result<BulkApplyResult, StoreError>;

    /// Insert seed documents wholesale.
    async fn insert_many(
        &self,
        collection: Collection,
        documents: &[Value],
    ) -> Result<usize, StoreError>;

    /// Export the documents of a collection visible to a tenant and
    /// within the scope's retention cutoff.
    async fn export(
        &self,
        collection: Collection,
        scope: ExportScope,
    ) -> Result<Vec<Value>, StoreError>;

    /// Fetch content documents by ID. Missing IDs are skipped.
    async fn fetch_contents(&self, ids: &[ContentId]) -> Result<Vec<Value>, StoreError>;

    /// Every content ID referenced by a tenant's seeded documents.
    async fn referenced_content_ids(&self, tenant: TenantId) -> Result<Vec<ContentId>, StoreError>;

    /// Invalidate every session token of a user. Returns the number revoked.
    async fn revoke_tokens(&self, user: UserId) -> Result<u64, StoreError>;
}

type CollectionMap = BTreeMap<String, Value>;

/// In-memory document store for tests/dev. Documents are raw JSON
/// objects keyed by their `_id` string.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<Collection, CollectionMap>>,
    revoked: RwLock<Vec<UserId>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Drop a document straight into a collection, for test setup.
    pub fn put(&self, collection: Collection, doc: Value) {
        if let Some(id) = doc_id(&doc) {
            let mut map = self.collections.write().unwrap();
            map.entry(collection).or_default().insert(id, doc);
        }
    }

    pub fn get(&self, collection: Collection, id: &str) -> Option<Value> {
        let map = self.collections.read().unwrap();
        map.get(&collection).and_then(|c| c.get(id)).cloned()
    }

    pub fn len(&self, collection: Collection) -> usize {
        let map = self.collections.read().unwrap();
        map.get(&collection).map_or(0, |c| c.len())
    }

    pub fn revoked_users(&self) -> Vec<UserId> {
        self.revoked.read().unwrap().clone()
    }
}

fn doc_id(doc: &Value) -> Option<String> {
    doc.get("_id").and_then(Value::as_str).map(str::to_owned)
}

fn matches_filter(doc: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return false;
    };
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

/// Merge an update document into a target. A `$set` object is applied
/// field by field; other operator keys are ignored; bare fields are set
/// directly.
fn apply_update(doc: &mut Value, update: &Value) {
    let Some(update) = update.as_object() else {
        return;
    };
    let Some(target) = doc.as_object_mut() else {
        return;
    };
    for (key, value) in update {
        if key == "$set" {
            if let Some(fields) = value.as_object() {
                for (k, v) in fields {
                    target.insert(k.clone(), v.clone());
                }
            }
        } else if !key.starts_with('$') {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl InMemoryDocumentStore {
    fn apply_one(map: &mut CollectionMap, op: &BulkOp) -> BulkApplyResult {
        let mut result = BulkApplyResult::default();
        match op {
            BulkOp::InsertOne { document } => match doc_id(document) {
                // Replayed inserts are skipped, not duplicated.
                Some(id) => {
                    map.entry(id).or_insert_with(|| document.clone());
                    result.applied += 1;
                }
                None => result.failed += 1,
            },
            BulkOp::InsertMany { documents } => {
                for doc in documents {
                    result.merge(Self::apply_one(
                        map,
                        &BulkOp::InsertOne { document: doc.clone() },
                    ));
                }
            }
            BulkOp::ReplaceOne { filter, replacement, upsert } => {
                let hit = map.values_mut().find(|d| matches_filter(d, filter));
                match hit {
                    Some(doc) => {
                        *doc = replacement.clone();
                        result.applied += 1;
                    }
                    None if *upsert => match doc_id(replacement) {
                        Some(id) => {
                            map.insert(id, replacement.clone());
                            result.applied += 1;
                        }
                        None => result.failed += 1,
                    },
                    None => result.applied += 1,
                }
            }
            BulkOp::UpdateOne { filter, update, upsert } => {
                match map.values_mut().find(|d| matches_filter(d, filter)) {
                    Some(doc) => apply_update(doc, update),
                    None if *upsert => {
                        // Upsert on miss: seed the document from the filter.
                        let mut doc = filter.clone();
                        apply_update(&mut doc, update);
                        match doc_id(&doc) {
                            Some(id) => {
                                map.insert(id, doc);
                            }
                            None => {
                                result.failed += 1;
                                return result;
                            }
                        }
                    }
                    None => {}
                }
                result.applied += 1;
            }
            BulkOp::UpdateMany { filter, update, upsert: _ } => {
                for doc in map.values_mut().filter(|d| matches_filter(d, filter)) {
                    apply_update(doc, update);
                }
                result.applied += 1;
            }
        }
        result
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn apply(
        &self,
        collection: Collection,
        ops: &[BulkOp],
    ) -> Result<BulkApplyResult, StoreError> {
        let mut collections = self.collections.write().unwrap();
        let map = collections.entry(collection).or_default();
        let mut result = BulkApplyResult::default();
        for op in ops {
            result.merge(Self::apply_one(map, op));
        }
        Ok(result)
    }

    async fn insert_many(
        &self,
        collection: Collection,
        documents: &[Value],
    ) -> Result<usize, StoreError> {
        let mut collections = self.collections.write().unwrap();
        let map = collections.entry(collection).or_default();
        let mut inserted = 0;
        for doc in documents {
            if let Some(id) = doc_id(doc) {
                map.entry(id).or_insert_with(|| doc.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn export(
        &self,
        collection: Collection,
        scope: ExportScope,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().unwrap();
        Ok(collections
            .get(&collection)
            .map(|c| {
                c.values()
                    .filter(|doc| within_retention(doc, &scope))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_contents(&self, ids: &[ContentId]) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().unwrap();
        let Some(map) = collections.get(&Collection::Contents) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| map.get(&id.to_string()).cloned())
            .collect())
    }

    async fn referenced_content_ids(
        &self,
        _tenant: TenantId,
    ) -> Result<Vec<ContentId>, StoreError> {
        // Walk every seeded collection and collect `contentId` fields.
        let collections = self.collections.read().unwrap();
        let mut ids = Vec::new();
        for (collection, map) in collections.iter() {
            if !collection.seeded() {
                continue;
            }
            for doc in map.values() {
                collect_content_ids(doc, &mut ids);
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn revoke_tokens(&self, user: UserId) -> Result<u64, StoreError> {
        let mut revoked = self.revoked.write().unwrap();
        revoked.push(user);
        Ok(1)
    }
}

fn within_retention(doc: &Value, scope: &ExportScope) -> bool {
    let Some(cutoff) = scope.updated_since else {
        return true;
    };
    match doc.get("updatedAt").and_then(Value::as_str) {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(updated) => updated.with_timezone(&Utc) >= cutoff,
            // An unparsable timestamp is not grounds to drop the document.
            Err(_) => true,
        },
        None => true,
    }
}

fn collect_content_ids(doc: &Value, out: &mut Vec<ContentId>) {
    match doc {
        Value::Object(map) => {
            for (key, value) in map {
                if key == "contentId" {
                    if let Some(s) = value.as_str() {
                        if let Ok(id) = s.parse::<ContentId>() {
                            out.push(id);
                        }
                    }
                }
                collect_content_ids(value, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_content_ids(item, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn insert_is_idempotent_on_replay() {
        let store = InMemoryDocumentStore::new();
        let op = BulkOp::InsertOne {
            document: json!({"_id": "u1", "name": "ada"}),
        };

        let first = store.apply(Collection::Users, &[op.clone()]).await.unwrap();
        let second = store.apply(Collection::Users, &[op]).await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(second.applied, 1);
        assert_eq!(store.len(Collection::Users), 1);
    }

    #[tokio::test]
    async fn replace_upserts_on_miss() {
        let store = InMemoryDocumentStore::new();
        let op = BulkOp::ReplaceOne {
            filter: json!({"_id": "s1"}),
            replacement: json!({"_id": "s1", "name": "north"}),
            upsert: true,
        };
        let result = store.apply(Collection::Schools, &[op]).await.unwrap();
        assert_eq!(result.applied, 1);
        assert_eq!(
            store.get(Collection::Schools, "s1").unwrap()["name"],
            "north"
        );
    }

    #[tokio::test]
    async fn update_merges_set_fields() {
        let store = InMemoryDocumentStore::new();
        store.put(Collection::Users, json!({"_id": "u1", "name": "ada", "role": "student"}));

        let op = BulkOp::UpdateOne {
            filter: json!({"_id": "u1"}),
            update: json!({"$set": {"role": "teacher"}}),
            upsert: false,
        };
        store.apply(Collection::Users, &[op]).await.unwrap();

        let doc = store.get(Collection::Users, "u1").unwrap();
        assert_eq!(doc["role"], "teacher");
        assert_eq!(doc["name"], "ada");
    }

    #[tokio::test]
    async fn export_drops_documents_past_the_retention_cutoff() {
        let store = InMemoryDocumentStore::new();
        let cutoff = Utc::now() - chrono::Duration::days(3 * 365);
        store.put(
            Collection::Books,
            json!({"_id": "b-old", "updatedAt": (cutoff - chrono::Duration::days(1)).to_rfc3339()}),
        );
        store.put(
            Collection::Books,
            json!({"_id": "b-new", "updatedAt": Utc::now().to_rfc3339()}),
        );
        store.put(Collection::Books, json!({"_id": "b-undated"}));

        let scope = ExportScope { tenant: TenantId::new(), updated_since: Some(cutoff) };
        let docs = store.export(Collection::Books, scope).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, ["b-new", "b-undated"]);

        // No cutoff exports everything.
        let all = store
            .export(Collection::Books, ExportScope { tenant: TenantId::new(), updated_since: None })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn referenced_content_ids_walk_seeded_collections_only() {
        let store = InMemoryDocumentStore::new();
        let referenced = ContentId::new();
        let unseeded = ContentId::new();
        store.put(
            Collection::Books,
            json!({"_id": "b1", "chapters": [{"contentId": referenced.to_string()}]}),
        );
        store.put(
            Collection::Jobs,
            json!({"_id": "j1", "contentId": unseeded.to_string()}),
        );

        let ids = store.referenced_content_ids(TenantId::new()).await.unwrap();
        assert_eq!(ids, vec![referenced]);
    }
}
