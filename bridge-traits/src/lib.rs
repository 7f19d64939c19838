//! # Host Bridge Traits
//!
//! Capability traits the sync engine depends on but does not implement itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Outbound HTTP with optional retry
//! - [`VideoSource`](video::VideoSource) - Subscriptions and uploads from a video platform
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert their own errors into it and keep the two classifications
//! the engine relies on intact: `Unauthorized` aborts a sync run,
//! `QuotaExhausted` stops it gracefully.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared across tasks
//! behind `Arc`.

pub mod error;
pub mod http;
pub mod time;
pub mod video;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
pub use video::{ApiCall, RemoteChannel, RemotePage, RemoteVideo, VideoSource};
