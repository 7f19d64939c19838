//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by every crate:
//! - Service configuration (`config`)
//! - Logging and tracing setup (`logging`)
//! - Sync event broadcasting (`events`)

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::SyncServiceConfig;
pub use error::{Error, Result};
