//! Client for the CarePulse healthcare operations portal API.
//!
//! - [`api`]: URL resolution, bearer credentials, the authenticated request function
//! - [`cache`]: deduplicating query cache with explicit invalidation and mutations
//! - [`query`]: per-view observers over the cache
//! - [`portal`]: typed portal endpoints and their cache keys
//!
//! The remaining modules back the `carepulse` command-line front end.

pub mod api;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod portal;
pub mod query;
pub mod session;
