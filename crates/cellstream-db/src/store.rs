//! The byte-keyed store interface the cell aggregator writes through.
//!
//! Only single-key `get`/`put`/`delete` are required. No transactions, no
//! multi-key atomicity: the aggregator's replace protocol relies on being
//! the only writer of any given key.

use std::future::Future;
use std::sync::Arc;

use crate::error::StoreError;

/// Ordered byte-keyed key/value store.
///
/// Futures are `Send` so a store can be driven from a spawned task.
pub trait CellStore: Send + Sync {
    /// Read the value at `key`, or `None` if absent.
    fn get(&self, key: &[u8]) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Write `value` at `key`, replacing any previous value.
    fn put(&self, key: &[u8], value: &[u8]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove `key`. Deleting an absent key succeeds.
    fn delete(&self, key: &[u8]) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<S: CellStore> CellStore for Arc<S> {
    fn get(&self, key: &[u8]) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).delete(key)
    }
}

/// Human-readable form of a key for log lines and errors.
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
