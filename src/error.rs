//! Error kinds returned by fallible counting quotient filter operations.

use thiserror::Error;

/// Errors that can occur while constructing or operating on a
/// [`CountingQuotientFilter`](crate::filter::CountingQuotientFilter).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CqfError {
    /// The filter is full (or resize failed) and cannot accept the insertion.
    #[error("quotient filter has no space left for this insertion")]
    NoSpace,

    /// `TRY_ONCE_LOCK` failed to acquire one of the stripe locks it needed.
    #[error("could not acquire a stripe lock on the first attempt")]
    CouldntLock,

    /// The requested (key, value) pair is not present in the filter.
    #[error("key/value pair does not exist in the filter")]
    DoesntExist,

    /// The operation is not supported under the filter's current hash mode,
    /// or a construction argument was out of range.
    #[error("operation is invalid: {0}")]
    Invalid(String),

    /// The iterator has been advanced past the last element.
    #[error("iterator is exhausted")]
    IterInvalid,

    /// `init`/`use_buffer` was given a backing buffer smaller than required.
    #[error("backing buffer too small, {required} bytes required")]
    BufferTooSmall {
        /// The number of bytes the caller must provide.
        required: usize,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CqfError>;
