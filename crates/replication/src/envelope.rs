//! The bulk-write envelope.
//!
//! One envelope describes everything a single sync delivery wants the remote
//! side to do: document writes per collection, an optional out-of-band content
//! fetch, object-storage changes, and extra side effects. It is a closed sum
//! type decoded strictly on receipt — nothing in it is trusted as free-form
//! JSON beyond the document bodies themselves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use edumesh_core::UserId;

use crate::collection::Collection;

/// One document-store write, in the document store's own bulk idiom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BulkOp {
    #[serde(rename_all = "camelCase")]
    InsertOne { document: Value },
    #[serde(rename_all = "camelCase")]
    InsertMany { documents: Vec<Value> },
    #[serde(rename_all = "camelCase")]
    ReplaceOne {
        filter: Value,
        replacement: Value,
        #[serde(default)]
        upsert: bool,
    },
    #[serde(rename_all = "camelCase")]
    UpdateOne {
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMany {
        filter: Value,
        update: Value,
        #[serde(default)]
        upsert: bool,
    },
}

/// Object-storage changes riding along with a sync delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSync {
    /// Base URL of the sender's object storage, for pulling added objects.
    pub server_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_objects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_objects: Vec<String>,
}

/// Non-document side effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraSync {
    /// Revoke every session token of this user on the receiving side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_all_tokens_by_user_id: Option<UserId>,
}

impl ExtraSync {
    pub fn is_empty(&self) -> bool {
        self.revoke_all_tokens_by_user_id.is_none()
    }
}

/// The full replication envelope carried by one sync job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bulk_write: BTreeMap<Collection, Vec<BulkOp>>,

    /// Signed pointer to content blobs to be fetched out-of-band.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSync>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<ExtraSync>,
}

impl SyncEnvelope {
    pub fn bulk(collection: Collection, ops: Vec<BulkOp>) -> Self {
        let mut bulk_write = BTreeMap::new();
        bulk_write.insert(collection, ops);
        Self {
            bulk_write,
            ..Default::default()
        }
    }

    pub fn with_bulk(mut self, collection: Collection, ops: Vec<BulkOp>) -> Self {
        self.bulk_write.entry(collection).or_default().extend(ops);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bulk_write.is_empty()
            && self.contents_token.is_none()
            && self.storage.is_none()
            && self.extra.as_ref().is_none_or(ExtraSync::is_empty)
    }
}
