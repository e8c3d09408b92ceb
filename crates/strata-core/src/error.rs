//! Error types shared across the strata crates.

use thiserror::Error;

/// Errors produced by query compilation, type marshalling, schema
/// synchronization, and the drivers.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    /// The table is not declared in the registry.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A field path does not resolve to any declared field.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// A declared field type cannot be mapped onto the target dialect.
    /// Fatal at `prepare`.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Primary or unique conflict on insert, surfaced to the caller
    /// unchanged.
    #[error("duplicate entry on {table}")]
    DuplicateEntry {
        /// Table the conflicting insert targeted.
        table: String,
    },

    /// Unsupported operator shape, raised before any I/O.
    #[error("malformed query: {0}")]
    QueryMalformed(String),

    /// Wrapped engine or transport error. The offending SQL goes to the
    /// tracing diagnostic channel, never into this message.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
