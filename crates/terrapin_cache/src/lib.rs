//! The cache engine. One [`ProviderCache`] runs per server process: it keeps
//! an append-only index of [`CacheEntry`] values, hands new entries to a
//! dispatcher task over a rendezvous channel, and materializes each entry
//! exactly once — download, unpack, authenticate — behind an advisory
//! per-entry file lock that also serializes other processes on the same
//! host.

mod entry;
mod entry_lock;
mod error;
mod fetch;
mod layout;
mod provider_cache;
mod unpack;

pub use entry::CacheEntry;
pub use entry_lock::EntryLock;
pub use error::{AggregateError, CacheError, UnpackError};
pub use layout::CacheLayout;
pub use provider_cache::ProviderCache;
