//! Store layer for the cellstream pipeline.
//!
//! The cell aggregator talks to persistence only through the [`CellStore`]
//! trait: byte keys (cell tokens), byte values (serialized collections),
//! single-key `get`/`put`/`delete`. Two backends are provided.
//!
//! # Modules
//!
//! - [`store`] -- The [`CellStore`] trait
//! - [`memory`] -- Ordered in-process store
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) store
//! - [`error`] -- Shared error types

pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod store;

// Re-export primary types for convenience.
pub use dragonfly::DragonflyStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{CellStore, display_key};
