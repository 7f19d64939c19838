//! # YouTube Provider
//!
//! Implements the `VideoSource` trait for the YouTube Data API v3.
//!
//! ## Overview
//!
//! This crate provides:
//! - Paginated listing of the caller's subscriptions
//! - Resolution of a channel's uploads playlist
//! - Paginated, newest-first listing of that playlist
//! - Classification of revoked credentials and upstream quota refusals

pub mod connector;
pub mod error;
pub mod types;

pub use connector::YouTubeConnector;
pub use error::{Result, YouTubeError};
