//! Route groups.

pub mod catalog;
pub mod cron;
pub mod sync;
