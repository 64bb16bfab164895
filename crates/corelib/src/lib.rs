//! Core library for the ring communication layer.
//!
//! This crate provides the value types and the contract shared by every
//! transport:
//! - Identifiers and circular identifier arithmetic
//! - Node addresses
//! - Entries and the reference/entry bundle exchanged on notify
//! - The `Node` contract and its shared handle
//! - A minimal in-memory local node

pub mod entry;
pub mod error;
pub mod id;
pub mod memory;
pub mod node;
pub mod url;

pub use entry::Entry;
pub use error::{ComResult, CommunicationError, Error, Result};
pub use id::Id;
pub use memory::MemoryNode;
pub use node::{Node, NodeRef, RefsAndEntries};
pub use url::{Protocol, Url};
