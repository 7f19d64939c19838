//! Workspace facade crate.
//!
//! Re-exports the pieces a host binary needs to embed the subscription sync
//! engine. The HTTP server lives behind the default `server` feature.
//!
//! | Crate | Role |
//! |-------|------|
//! | `core-sync` | Orchestrator, quota ledger, fetcher, scheduler, rollback |
//! | `core-library` | Catalog storage (channels, videos, groups) |
//! | `core-service` | axum router and server bootstrap |

pub use core_library as library;
pub use core_sync as sync;

#[cfg(feature = "server")]
pub use core_service as service;
