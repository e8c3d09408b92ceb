//! # strata-sqlite
//!
//! Embedded SQLite driver for strata.
//!
//! # How this backend differs from the others
//!
//! - The working database is **in-memory**; a configured file path acts
//!   as its durable snapshot, restored at `start` and rewritten by a
//!   debounced flush after every mutation. `":memory:"` disables
//!   persistence.
//! - Two scalar UDFs are registered at `start`: `regexp(pattern, text)`
//!   backing the `REGEXP` operator, and
//!   `json_array_contains(array, value)` backing element containment.
//! - Temporal fields are stored as epoch-millisecond integers.
//! - ALTER TABLE is limited, so renames and type changes rebuild the
//!   table through a temp copy that preserves unmapped live columns.
//! - Upserts probe for existing rows in chunks sized to the engine's
//!   expression-tree depth ceiling.

mod dialect;
mod driver;
mod snapshot;
mod stmt;
mod sync;
mod worker;

pub use dialect::SqliteDialect;
pub use driver::{SqliteConfig, SqliteDriver};
pub use snapshot::MEMORY_PATH;
