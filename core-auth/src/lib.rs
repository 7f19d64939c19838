//! # Authentication Module
//!
//! Caller identity and credentials for the sync service.
//!
//! ## Overview
//!
//! - [`UserId`] is the validated identity every sync operation is scoped to.
//! - [`TokenProvider`] hands out the platform access token for a user.
//! - [`CronAuthenticator`] checks the shared secret presented by scheduled
//!   callers and throttles repeated bad attempts inside a sliding window.
//!
//! Interactive sign-in is handled upstream. This crate only consumes tokens
//! that are already stored.

pub mod cron;
pub mod error;
pub mod token_store;
pub mod types;

pub use cron::{extract_cron_secret, CronAuthOutcome, CronAuthenticator};
pub use error::{AuthError, Result};
pub use token_store::{SqliteTokenStore, StaticTokenProvider, TokenProvider};
pub use types::{AccessToken, UserId};
