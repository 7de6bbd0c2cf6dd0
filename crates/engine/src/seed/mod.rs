//! Satellite bootstrap (seeding).
//!
//! The hub side exports one tenant's dataset into a time-boxed blob
//! (`SeedService`); the satellite side downloads and installs it
//! (`SatelliteBootstrap`). Both ends report the outcome back through
//! the `seedComplete` handshake so the hub knows whether the link may
//! start receiving sync deliveries.

mod hub;
mod satellite;

pub use hub::SeedService;
pub use satellite::{BootstrapReport, SatelliteBootstrap};

use edumesh_infra::{StorageError, StoreError};
use edumesh_replication::{SeedDataError, TokenError};

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("invalid satellite token")]
    Token(#[from] TokenError),
    #[error("unknown tenant")]
    UnknownTenant,
    #[error("clock skew of {0}ms exceeds limit")]
    ClockSkew(i64),
    #[error("incompatible version {0}")]
    VersionMismatch(String),
    #[error("tenant was seeded less than {0}h ago")]
    ReseedWindow(i64),
    #[error("seed blob not found")]
    BlobNotFound,
    #[error("this deployment is already initialized")]
    AlreadyInitialized,
    #[error("an initialization is already in progress")]
    InitInProgress,
    #[error("satellite is missing its hub configuration")]
    Misconfigured,
    #[error("malformed seed response: {0}")]
    BadSeedResponse(String),
    #[error(transparent)]
    SeedData(#[from] SeedDataError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("seed serialization failed: {0}")]
    Serialize(String),
}
