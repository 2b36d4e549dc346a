//! Keyed store abstraction.
//!
//! Defines [`KeyedStore`], the storage seam used by orchestration code for
//! its mutable maps (status registries, result caches), and
//! [`ShardedMemoryStore`], an in-memory implementation sharded across
//! independently locked segments so unrelated keys never contend on a
//! single lock.
//!
//! The trait is async and backend-agnostic: callers hold
//! `Arc<dyn KeyedStore<V>>` and can swap in a persistent backend without
//! touching orchestration logic.

pub mod error;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::ShardedMemoryStore;

use async_trait::async_trait;

/// A concurrent map from string keys to values of type `V`.
///
/// Guarantees:
/// - `put` overwrites any existing value for the key.
/// - `get` returns a clone of the stored value, or `None` if absent.
/// - `delete` is a no-op for absent keys and reports whether a value was
///   removed.
/// - `list_keys` is a point-in-time snapshot; it is not synchronized with
///   concurrent writers.
#[async_trait]
pub trait KeyedStore<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<V>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: V) -> StoreResult<()>;

    /// Remove the value stored under `key`. Returns `true` if a value was
    /// present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Snapshot of all keys currently present.
    async fn list_keys(&self) -> StoreResult<Vec<String>>;
}
