//! `Dragonfly` (Redis-compatible) cell store.
//!
//! Cell collections live under their cell token as plain string keys, one
//! key per cell. Values are the serialized collection bytes.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `{token}` | Bytes | Serialized cell collection |

use fred::prelude::*;

use crate::error::StoreError;
use crate::store::CellStore;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`]. Clones share the connection.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Fail fast instead of queueing commands on a closed connection.
    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.client.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "Dragonfly connection is {:?}",
                self.client.state()
            )))
        }
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Dragonfly`] if the quit command fails.
    pub async fn quit(&self) -> Result<(), StoreError> {
        self.client.quit().await?;
        Ok(())
    }
}

impl CellStore for DragonflyStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.ensure_connected()?;
        let value: Option<Vec<u8>> = self.client.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let _: () = self
            .client
            .set(key, Value::Bytes(value.to_vec().into()), None, None, false)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let _: u32 = self.client.del(key).await?;
        Ok(())
    }
}
