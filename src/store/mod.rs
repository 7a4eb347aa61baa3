//! Counter store back ends.
//!
//! The relational stores keep one row per key and make every ledger write a
//! single statement. The memory store mirrors their semantics in-process.

mod memory;
mod postgres;
pub mod sql;
mod sqlite;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
