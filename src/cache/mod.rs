//! Query cache: deduplicated reads, explicit invalidation, and mutations.
//!
//! Reads are keyed by [`QueryKey`]; the cache trusts a value until it is
//! invalidated (no stale time, no focus refetch, no retries by default).
//! Writes go through [`Mutation`], which names the keys it makes stale.

mod client;
mod key;
mod mutation;
mod options;
mod result;

pub use client::QueryClient;
pub use key::{KeyPart, QueryKey};
pub use mutation::Mutation;
pub use options::{QueryDefaults, QueryOptions};
pub use result::{CacheResult, CacheSource};
