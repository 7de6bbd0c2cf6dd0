//! `edumesh-engine` — replication and background-work engine.
//!
//! The engine has two halves sharing one wake channel:
//!
//! * the **job runner** claims queued tasks one at a time and races each
//!   handler against a deadline;
//! * the **sync dispatcher** drains per-tenant journals of outbound
//!   changes in strict order, halting a tenant's lane on the first
//!   failed delivery.
//!
//! Around them sit the inbound receiver ([`apply::SyncReceiver`]), the
//! seeding handshake ([`seed`]), and the [`service::Engine`] loop that
//! drives everything.

pub mod apply;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod notify_sync;
pub mod roles;
pub mod runner;
pub mod seed;
pub mod service;
pub mod transport;

pub use apply::{ApplyError, Resolver, SyncReceiver, SystemResolver};
pub use config::EngineConfig;
pub use dispatcher::{DispatchOutcome, SyncDispatcher};
pub use handlers::{HandlerRegistry, TaskError, TaskHandler};
pub use notify_sync::NotifySync;
pub use roles::{Role, SyncDestination, role_from_config};
pub use runner::JobRunner;
pub use seed::{BootstrapReport, SatelliteBootstrap, SeedError, SeedService};
pub use service::Engine;
pub use transport::{HttpPeerClient, PeerClient, TransportError};
