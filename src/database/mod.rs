//! Durable proxy storage
//!
//! One SQLite file holds one table per bucket; every bucket is mirrored in memory for
//! lookups, export and random sampling.

pub mod mirror;
pub mod store;

pub use mirror::Mirror;
pub use store::MirroredStore;
