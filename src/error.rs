use std::path::PathBuf;

/// The errors that this crate can produce.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wraps `std::io::Error`.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A tagged header was missing a required field.
    #[error("header is missing required field `{0}`")]
    MissingHeaderField(String),

    /// A tagged header field could not be parsed into the expected type.
    #[error("header field `{field}` has invalid value `{value}`")]
    InvalidHeaderField {
        /// The field's tag.
        field: String,
        /// The raw value that could not be parsed.
        value: String,
    },

    /// The application attempted to add a field that already exists.
    #[error("header already has a field named `{0}`")]
    DuplicateHeaderField(String),

    /// The header did not fit inside its reserved, fixed-size region.
    #[error("header of {size} bytes exceeds the reserved header size of {max} bytes")]
    HeaderTooLarge {
        /// The size the header serialized to.
        size: usize,
        /// The maximum permitted header size for this file type.
        max: usize,
    },

    /// The file did not begin with a recognized tagged header sentinel.
    #[error("{0} does not look like a CZMIL dataset file")]
    NotADatasetFile(PathBuf),

    /// The file's format version is newer than this library understands.
    #[error("file version {found} is newer than the highest version ({supported}) this library supports")]
    UnsupportedVersion {
        /// The version found in the file.
        found: String,
        /// The highest version this library understands.
        supported: String,
    },

    /// A value could not be represented in the bit width and scale given by
    /// the file's format-information block.
    #[error("value {value} does not fit in {bits} bits at scale {scale}")]
    ValueOutOfRange {
        /// The value that was rejected.
        value: f64,
        /// The bit width it was being encoded into.
        bits: u32,
        /// The scale factor in effect.
        scale: f64,
    },

    /// A shot produced more returns on one channel than the file format
    /// allows.
    #[error("channel produced {found} returns, but at most {max} are permitted")]
    TooManyReturns {
        /// The number of returns the caller supplied.
        found: usize,
        /// The maximum permitted by this file's format.
        max: usize,
    },

    /// A waveform packet's index exceeded the maximum the format allows.
    #[error("packet index {0} exceeds the maximum packet index for this file")]
    TooManyPackets(usize),

    /// An append was attempted on a handle that has already been finalized.
    #[error("cannot write to a file handle that has already been closed")]
    AlreadyClosed,

    /// A random-access read was attempted with an ordinal past the last
    /// record in the file.
    #[error("record ordinal {ordinal} is out of bounds for a file with {len} records")]
    OrdinalOutOfBounds {
        /// The requested ordinal.
        ordinal: u64,
        /// The number of records in the file.
        len: u64,
    },

    /// The waveform, point, and index files being opened together do not
    /// agree on record count or on a record's byte layout.
    #[error("{0}")]
    Inconsistent(String),

    /// A bit-packing operation was asked to read or write a field wider
    /// than the primitive it decodes into.
    #[error("bit width {0} exceeds the maximum supported width")]
    BitWidthTooWide(u32),

    /// Something about the handle registry itself went wrong: this is
    /// generally a sign of a poisoned mutex from a panic in another thread.
    #[error("the crash-cleanup registry is unavailable: {0}")]
    RegistryUnavailable(String),
}

/// This crate's `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
