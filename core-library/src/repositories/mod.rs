//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations for the catalog.
//!
//! - Traits define the interface for each entity
//! - SQLite implementations use sqlx for async database access
//! - Every query is scoped to one user
//!
//! ## Available Repositories
//!
//! - `ChannelRepository` - Subscribed channels with depth policy and tier
//! - `VideoRepository` - Deduplicated uploads per channel
//! - `GroupRepository` - User groups and their channel membership
//! - `SyncStateRepository` - Per-channel incremental sync position

pub mod channel;
pub mod group;
pub mod sync_state;
pub mod video;

pub use channel::{ChannelRepository, SqliteChannelRepository};
pub use group::{GroupRepository, SqliteGroupRepository};
pub use sync_state::{SqliteSyncStateRepository, SyncStateRepository};
pub use video::{SqliteVideoRepository, VideoRepository};
