//! # hg-store
//!
//! Repository abstraction for hypergrid. Grids and artifact records live in a
//! key-addressed store offering atomic create-and-lock, owner-reentrant
//! exclusive locks and versioned updates. Two backends are provided: an
//! in-memory map and a directory of JSON documents.

mod file;
mod memory;
mod repository;

pub use file::JsonFileRepository;
pub use memory::InMemoryRepository;
pub use repository::{Entity, LockOwner, Repository};
