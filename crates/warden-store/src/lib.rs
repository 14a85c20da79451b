//! # warden-store
//!
//! Durable state for Warden: per-entity attributes, staff profiles and the
//! audit trail, behind read-through TTL caches.
//!
//! ## Model
//!
//! - An [`Entity`] is a user or guild addressed by `(kind, id)`. Rows are
//!   created lazily on first access and never deleted.
//! - Boolean attributes exist only by presence. Setting `false` (or
//!   clearing) removes the key; [`AttributeValue`] has no `false` variant.
//! - Every attribute `set` appends exactly one audit record, in the same
//!   transaction as the row change.
//! - Staff profile writes also maintain the derived `TEAM` attribute, in the
//!   same transaction.
//!
//! ## Backends
//!
//! [`StorageBackend`] is implemented by [`SqliteBackend`] (durable) and
//! [`MemoryBackend`] (tests, and its availability switch simulates an
//! unreachable store).
//!
//! The [`Store`] facade adds caching, per-identity serialisation of writes
//! and one retry on optimistic-version conflicts.

pub mod backend;
pub mod cache;
pub mod clock;
pub mod error;
pub mod locks;
pub mod store;
pub mod value;

pub use backend::{
    AttributeChange, AttributeProjection, MemoryBackend, ProfileCommit, SqliteBackend,
    StorageBackend,
};
pub use cache::{CacheStats, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use locks::KeyedLocks;
pub use store::{CacheOptions, ProfileUpdate, Store, MAX_PROFILE_TTL_SECS};
pub use value::{AttributeInput, AttributeValue, Entity};
