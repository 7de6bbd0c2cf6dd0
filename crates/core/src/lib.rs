//! `edumesh-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod mode;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{ContentId, SeedingId, SyncJobId, TaskId, TenantId, UserId};
pub use mode::Mode;
pub use version::BuildVersion;
