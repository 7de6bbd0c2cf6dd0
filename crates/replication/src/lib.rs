//! `edumesh-replication` — replication domain types.
//!
//! Everything that crosses the hub/satellite wire or sits in a queue lives
//! here: the bulk-write envelope, the collection ownership table, sync jobs,
//! background tasks, content tokens and the seed payload.

pub mod collection;
pub mod envelope;
pub mod seed;
pub mod sync_job;
pub mod task;
pub mod token;
pub mod wire;

pub use collection::Collection;
pub use envelope::{BulkOp, ExtraSync, StorageSync, SyncEnvelope};
pub use seed::{SeedDataError, SeedPayload};
pub use sync_job::{NotifyPayload, SyncJob};
pub use task::{Task, TaskKind, TaskStatus};
pub use token::{TokenError, TokenSigner};
