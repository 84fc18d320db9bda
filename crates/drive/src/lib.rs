//! # KeyDrive Library
//!
//! This crate emulates a hierarchical filesystem on top of the flat, ordered
//! key-value namespace provided by the `store` crate.
//!
//! ## Overview
//!
//! Only files are stored. Everything else is inferred from key order:
//!
//! - **Shallow listing**: immediate children found with two-key range peeks
//! - **Recursive listing**: one linear scan, directories synthesized from
//!   file ancestors
//! - **Stat sidecar**: create/modify/access events with ancestor cascades
//! - **Mutations**: collision-checked put, delete, mkdir, copy and move
//! - **Transfers**: folder streaming between drives and the local filesystem
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        keydrive (CLI)                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │  DirIter /   │  │     Stat     │  │     Mutations        │   │
//! │  │  Recursive   │  │   Lifecycle  │  │  put/del/mkdir/cp    │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! │                                                                 │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │          Transfer (FolderReadStream → FolderTarget)        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │                                                                 │
//! │  ┌───────────────────┐  ┌───────────────────────────────────┐   │
//! │  │  store::Namespace │  │  store::StatStore    LocalDrive   │   │
//! │  └───────────────────┘  └───────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use drive::{ListOptions, MemoryDrive};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> drive::DriveResult<()> {
//! let drive = MemoryDrive::in_memory();
//! drive.write("/projects/keydrive/README.md", "# KeyDrive").await?;
//!
//! for entry in drive.list("/projects", ListOptions::default()).await? {
//!     println!("{} {:?}", entry.path, entry.kind);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`drive`]: The drive, listings, stats and mutations
//! - [`transfer`]: Folder streaming and the local filesystem endpoint
//! - [`path`]: Path normalization and key ranges
//! - [`error`]: Error types

pub mod config;
pub mod drive;
pub mod error;
pub mod path;
pub mod transfer;

// Re-export store for convenience
pub use store;

// Re-export config types for convenience
pub use config::{Backend, Config, ConfigError};

// Re-export drive types for convenience
pub use drive::{
    sort_entries, AncestorOptions, DirEntry, DirIter, Drive, DriveOptions, EntryKind,
    ListOptions, Listing, MemoryDrive, MonotonicClock, PutOptions, ReaddirOptions,
    RecursiveLister, RmDirOptions, SetStatOptions, SortBy, SortOrder, SqliteDrive, Stat,
    StatMethod, DEFAULT_CHUNK_SIZE,
};

// Re-export error types for convenience
pub use error::{DriveError, DriveResult};

// Re-export transfer types for convenience
pub use transfer::{
    ContentReader, ContentWriter, FolderItem, FolderReadStream, FolderTarget, FolderWriteStream,
    LocalDrive, LocalEntry, TransferSummary,
};
