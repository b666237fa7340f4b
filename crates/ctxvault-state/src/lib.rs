//! ctxvault-state: durable entry storage for ctxvault
//!
//! This crate is the persistence layer behind the entry store. It owns the
//! entry data model, the per-owner repository contract, and its backends.
//!
//! ## Key Components
//!
//! - `MemoryEntry` / `OwnerId`: entry record and collection boundary
//! - `EntryRepository`: durable collection for one owner (get_all/get/put/delete/clear)
//! - `StorageBackend`: one repository per owner, plus owner enumeration
//! - `SurrealStorageBackend`: SurrealDB implementation (mem, surrealkv, ws)
//! - `fakes`: in-memory implementations with call counting and fault injection

mod error;
pub mod fakes;
pub mod handle;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_repository;

pub use error::{StateError, StorageError};
pub use handle::CloudConfig;
pub use schema::{Category, EntryRow, MemoryEntry, OwnerId, Scope};
pub use storage_traits::{EntryRepository, StorageBackend, StorageResult};
pub use surreal_repository::{SurrealEntryRepository, SurrealStorageBackend};

/// Result type for ctxvault-state setup operations
pub type Result<T> = std::result::Result<T, StateError>;
