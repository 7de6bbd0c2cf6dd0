//! Satellite seed payload.
//!
//! The hub aggregates every seeded collection into one JSON blob; the
//! satellite downloads and decodes it defensively — a remote payload is never
//! assumed well-formed, and a malformed top-level shape aborts the whole
//! bootstrap before anything is inserted.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::collection::Collection;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedDataError {
    #[error("invalid seed data: {0}")]
    Invalid(&'static str),
}

/// One tenant's complete bootstrap dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedPayload {
    #[serde(flatten)]
    pub collections: BTreeMap<Collection, Vec<Value>>,
    /// Chunked signed content tokens; resolved sequentially after insert.
    pub contents_tokens: Vec<String>,
    /// Base URL of the hub's object storage, for media cloning.
    pub storage_url: String,
}

impl SeedPayload {
    pub fn new(storage_url: impl Into<String>) -> Self {
        Self {
            collections: BTreeMap::new(),
            contents_tokens: Vec::new(),
            storage_url: storage_url.into(),
        }
    }

    /// The single tenant record every seed payload must carry.
    pub fn tenant(&self) -> Result<&Value, SeedDataError> {
        let tenants = self
            .collections
            .get(&Collection::Tenants)
            .ok_or(SeedDataError::Invalid("tenants missing"))?;
        match tenants.as_slice() {
            [tenant] => Ok(tenant),
            _ => Err(SeedDataError::Invalid("tenants must hold exactly one record")),
        }
    }

    /// Strict decode of a downloaded seed blob.
    ///
    /// Checks shape field by field: `tenants` must be an array of exactly one
    /// object, every present collection must be an array of objects, and the
    /// token list must be an array of strings. Unknown keys are rejected.
    pub fn from_value(value: Value) -> Result<Self, SeedDataError> {
        let Value::Object(mut map) = value else {
            return Err(SeedDataError::Invalid("payload is not an object"));
        };

        let tokens = match map.remove("contentsTokens") {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(SeedDataError::Invalid("contentsTokens entry is not a string")),
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(SeedDataError::Invalid("contentsTokens is not an array")),
            None => Vec::new(),
        };

        let storage_url = match map.remove("storageUrl") {
            Some(Value::String(s)) => s,
            _ => return Err(SeedDataError::Invalid("storageUrl missing or not a string")),
        };

        let mut collections = BTreeMap::new();
        for (key, value) in map {
            let collection: Collection = serde_json::from_value(Value::String(key))
                .map_err(|_| SeedDataError::Invalid("unknown collection key"))?;
            let Value::Array(docs) = value else {
                return Err(SeedDataError::Invalid("collection value is not an array"));
            };
            if docs.iter().any(|d| !d.is_object()) {
                return Err(SeedDataError::Invalid("collection entry is not an object"));
            }
            collections.insert(collection, docs);
        }

        let payload = Self {
            collections,
            contents_tokens: tokens,
            storage_url,
        };
        payload.tenant()?;
        Ok(payload)
    }
}
