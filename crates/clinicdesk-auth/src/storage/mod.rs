//! Durable session storage.
//!
//! - [`KeyValueStore`] is the host capability: a string key-value store with
//!   browser local-storage semantics (last writer wins, visible to every
//!   service sharing the same backing store).
//! - [`MemoryStore`] and [`FileStore`] are the bundled implementations.
//! - [`SessionStore`] is the typed view the auth service works through.
//!
//! # Security Considerations
//!
//! - Stored values include bearer tokens; never log them
//! - File-backed stores should live in a directory only the user can read

pub mod file;
pub mod kv;
pub mod session;

pub use file::FileStore;
pub use kv::{KeyValueStore, MemoryStore};
pub use session::{SessionStore, keys};
