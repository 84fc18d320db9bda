//! # KeyDrive Store Library
//!
//! This crate provides the storage collaborators the KeyDrive filesystem
//! layer is built on.
//!
//! ## Overview
//!
//! Storage is deliberately flat:
//!
//! - **Namespace**: an ordered key-value store of [`Node`]s with scoped range
//!   cursors over byte-lexicographic key intervals
//! - **Content Log**: append-only 64KB blocks addressed by [`BlobRef`]
//! - **Stat Store**: an independent path to [`StatRecord`] key space
//!
//! Nothing here knows about directories. Directory structure is inferred by
//! the `drive` crate from key ranges.
//!
//! ## Backends
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │  MemoryNamespace         │   │  Database (SQLite)           │
//! │  MemoryStatStore         │   │   ├── SqliteNamespace        │
//! │  BTreeMap + DashMap      │   │   └── SqliteStatStore        │
//! └──────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use store::{KeyRange, MemoryNamespace, Namespace, NodeData, RangeCursor};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> store::StoreResult<()> {
//! let ns = MemoryNamespace::new();
//! let blob = ns.append_blob(b"hello").await?;
//! ns.put("/docs/readme", NodeData::file(blob)).await?;
//!
//! let mut cursor = ns.range_iterator(KeyRange::between("/docs/", "/docs0"));
//! cursor.open().await?;
//! while let Some(node) = cursor.next().await? {
//!     println!("{}", node.key);
//! }
//! cursor.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`node`]: Node, blob and stat record types
//! - [`namespace`]: Collaborator traits and key ranges
//! - [`memory`]: In-memory backends
//! - [`sqlite`]: SQLite backend
//! - [`error`]: Error types

pub mod error;
pub mod memory;
pub mod namespace;
pub mod node;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCursor, MemoryNamespace, MemoryStatStore};
pub use namespace::{KeyRange, Namespace, RangeCursor, StatStore};
pub use node::{unix_millis, BlobRef, Node, NodeData, StatRecord, BLOCK_SIZE};
pub use sqlite::{Database, SqliteCursor, SqliteNamespace, SqliteStatStore};
