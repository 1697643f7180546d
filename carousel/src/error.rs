//! Error types for the carousel round-robin database.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all carousel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A column or archive definition is invalid.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Opening or creating a database file failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A write was attempted on a handle opened read-only.
    #[error("database is open read-only")]
    ReadOnly,

    /// The incoming timestamp is older than the one stored in the target
    /// slot. The slot is left unmodified.
    #[error("stale write: slot holds timestamp {stored}, refusing older {incoming}")]
    StaleWrite {
        /// Timestamp currently stored in the slot.
        stored: i64,
        /// Rejected incoming timestamp.
        incoming: i64,
    },

    /// A column was referenced by a name or index that does not exist.
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// An archive was referenced by a name or index that does not exist.
    #[error("unknown archive '{0}'")]
    UnknownArchive(String),

    /// Serializing or parsing a dump document failed.
    #[error("dump error: {0}")]
    Dump(#[from] serde_json::Error),

    /// An underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while opening or creating a database file.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `create` refuses to overwrite an existing file.
    #[error("database file '{}' already exists", path.display())]
    AlreadyExists {
        /// The offending path.
        path: PathBuf,
    },

    /// The advisory lock on the `.lock` sibling is held elsewhere.
    #[error("lock file '{}' is held by another process", path.display())]
    Locked {
        /// Path of the lock file.
        path: PathBuf,
    },

    /// The file's magic number does not match.
    #[error("invalid file: bad magic {found:#x}")]
    BadMagic {
        /// The magic value found in the header.
        found: i64,
    },

    /// The file was written by a newer (or nonsensical) format version.
    #[error("unsupported file version {found} (newest supported is {newest})")]
    UnsupportedVersion {
        /// Version found in the header.
        found: i32,
        /// Newest version this build can read.
        newest: i32,
    },

    /// The file is shorter than its own header claims.
    #[error("truncated file '{}': {reason}", path.display())]
    Truncated {
        /// Path of the damaged file.
        path: PathBuf,
        /// What was missing.
        reason: String,
    },
}

/// Errors raised while validating or parsing a schema.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A schema must define at least one column.
    #[error("no columns defined")]
    NoColumns,

    /// A schema must define at least one archive.
    #[error("no archives defined")]
    NoArchives,

    /// Column names must be unique within a schema.
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),

    /// Archive names must be unique within a schema.
    #[error("duplicate archive name '{0}'")]
    DuplicateArchive(String),

    /// Names are stored as 16 fixed bytes on disk.
    #[error("name '{0}' exceeds 16 bytes")]
    NameTooLong(String),

    /// Archive steps are sampling periods in seconds.
    #[error("invalid archive step {0} (must be positive)")]
    InvalidStep(i64),

    /// Archives are rings of a fixed, positive row count.
    #[error("invalid archive row count {0} (must be positive)")]
    InvalidRows(i64),

    /// A resize that keeps the current row count is a no-op.
    #[error("archive already has {0} rows")]
    RowsUnchanged(i32),

    /// A column's minimum bound must not exceed its maximum.
    #[error("column '{name}': minimum {minimum} exceeds maximum {maximum}")]
    InvertedBounds {
        /// The offending column.
        name: String,
        /// Configured minimum.
        minimum: f32,
        /// Configured maximum.
        maximum: f32,
    },

    /// The function token of a column spec was not recognized.
    #[error("unknown aggregation function '{0}'")]
    UnknownFunction(String),

    /// A `function[:name[:min[:max]]]` item could not be parsed.
    #[error("invalid column spec '{0}'")]
    InvalidColumnSpec(String),

    /// A `rows:step[:name]` item could not be parsed.
    #[error("invalid archive spec '{0}'")]
    InvalidArchiveSpec(String),

    /// A bound must be a finite 32-bit float.
    #[error("invalid bound '{0}'")]
    InvalidBound(String),
}

/// Type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
