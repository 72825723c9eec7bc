//! Error types for sequence packing

use thiserror::Error;

/// Configuration and data errors raised by the packing pipeline
///
/// Operations return `anyhow::Result`; these variants travel inside it and
/// can be recovered with `downcast_ref::<PackError>()`.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PackError {
    /// Window length must be at least one token
    #[error("invalid window length: {0} (must be > 0)")]
    InvalidWindowLength(usize),

    /// Any other invalid packer or pipeline setting
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A record lacks a field required by the formatting function
    #[error("record is missing field `{field}`")]
    MissingField {
        /// Name of the missing field
        field: String,
    },

    /// A formatting template could not be parsed
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// An infinite packer was given a source with no records
    #[error("record source produced no records; cannot restart an empty source")]
    EmptySource,

    /// Seek beyond the end of a record source
    #[error("cannot seek to record {position}: source holds {len} records")]
    SeekOutOfRange {
        /// Requested cursor position
        position: usize,
        /// Number of records available
        len: usize,
    },
}
