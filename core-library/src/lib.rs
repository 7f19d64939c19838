//! # Catalog Library
//!
//! Owns the subscription catalog database and provides repository patterns
//! for data access.
//!
//! ## Overview
//!
//! This crate manages:
//! - The SQLite schema and its migrations
//! - Repositories for channels, videos, groups and channel sync state
//! - User-scoped bulk deletion used to undo a failed onboarding

pub mod db;
pub mod error;
pub mod models;
pub mod purge;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    Channel, ChannelSyncState, DepthPolicy, Group, NewChannel, NewVideo, PriorityTier, Video,
};
pub use purge::{LibraryPurge, PurgeReport, SqliteLibraryPurge};
