// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Error types for ISO 9660 image parsing, mutation and re-mastering.

use core::fmt;
use std::io;

/// Coarse classification of an [`Error`].
///
/// Every error falls into one of these groups; tests and callers that only
/// care about the class of failure can match on this instead of the full
/// variant set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller misused the API (bad path, missing extension, conflicting
    /// arguments, out-of-range name).
    InvalidInput,
    /// The on-disc data violates the specification.
    InvalidIso,
    /// An internal invariant was violated; this is a bug in the library.
    Internal,
    /// Path resolution failed.
    NotFound,
    /// An I/O error was reported by the underlying stream.
    Io,
}

/// Errors that can occur while parsing, mutating or writing an ISO image.
#[derive(Debug)]
pub enum Error {
    /// The caller misused the API.
    InvalidInput(&'static str),
    /// A file or directory identifier exceeds the maximum length for the
    /// active interchange level.
    IdentifierTooLong {
        /// The identifier that was too long
        identifier: String,
        /// The maximum allowed length
        max_length: usize,
    },
    /// A file or directory identifier contains characters outside the
    /// allowed set.
    InvalidIdentifier {
        /// The offending identifier
        identifier: String,
        /// Why it was rejected
        reason: &'static str,
    },
    /// The directory nesting exceeds the maximum depth (8 levels) and Rock
    /// Ridge relocation is not available.
    DirectoryTooDeep,
    /// An operation required an extension (Joliet, Rock Ridge, UDF, El
    /// Torito) that is not present on this image.
    ExtensionAbsent(&'static str),
    /// An operation was attempted on an image that has not been opened or
    /// created yet, or on one that has been closed.
    NotInitialized,
    /// A directory could not be removed because it still has children.
    DirectoryNotEmpty(String),

    /// The on-disc data violates the specification.
    InvalidIso(&'static str),
    /// A magic number or signature did not match.
    BadMagic {
        /// What was being parsed
        what: &'static str,
        /// The bytes found on disc
        found: Vec<u8>,
    },
    /// The little- and big-endian halves of a both-endian field disagree.
    EndianMismatch {
        /// The field that disagreed
        field: &'static str,
        /// Value decoded from the little-endian half
        little: u32,
        /// Value decoded from the big-endian half
        big: u32,
    },
    /// A checksum or CRC did not match the recorded value.
    BadChecksum {
        /// What was being checked
        what: &'static str,
        /// The value recorded on disc
        expected: u32,
        /// The value computed from the data
        found: u32,
    },
    /// A UDF descriptor tag's recorded location does not match the extent
    /// it was read from.
    BadTagLocation {
        /// The extent the descriptor was read from
        expected: u32,
        /// The location recorded in the tag
        found: u32,
    },
    /// The input ended before a complete structure could be read.
    UnexpectedEndOfData,

    /// Path resolution failed.
    NotFound(String),
    /// The path resolved to a file where a directory was required, or vice
    /// versa.
    WrongRecordType(String),

    /// An internal invariant was violated.
    Internal(&'static str),

    /// An I/O error from the underlying stream.
    Io(io::Error),
}

impl Error {
    /// Returns the coarse [`ErrorKind`] for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_)
            | Error::IdentifierTooLong { .. }
            | Error::InvalidIdentifier { .. }
            | Error::DirectoryTooDeep
            | Error::ExtensionAbsent(_)
            | Error::NotInitialized
            | Error::DirectoryNotEmpty(_) => ErrorKind::InvalidInput,
            Error::InvalidIso(_)
            | Error::BadMagic { .. }
            | Error::EndianMismatch { .. }
            | Error::BadChecksum { .. }
            | Error::BadTagLocation { .. }
            | Error::UnexpectedEndOfData => ErrorKind::InvalidIso,
            Error::NotFound(_) | Error::WrongRecordType(_) => ErrorKind::NotFound,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::IdentifierTooLong {
                identifier,
                max_length,
            } => write!(
                f,
                "identifier '{identifier}' exceeds maximum length of {max_length} bytes"
            ),
            Error::InvalidIdentifier { identifier, reason } => {
                write!(f, "invalid identifier '{identifier}': {reason}")
            }
            Error::DirectoryTooDeep => {
                write!(f, "directory nesting exceeds maximum depth")
            }
            Error::ExtensionAbsent(ext) => {
                write!(f, "operation requires the {ext} extension, which is absent")
            }
            Error::NotInitialized => write!(f, "image not initialized"),
            Error::DirectoryNotEmpty(path) => write!(f, "directory '{path}' is not empty"),
            Error::InvalidIso(msg) => write!(f, "invalid ISO: {msg}"),
            Error::BadMagic { what, found } => {
                write!(f, "bad magic while parsing {what}: {found:02x?}")
            }
            Error::EndianMismatch { field, little, big } => write!(
                f,
                "both-endian field {field} disagrees: little-endian {little}, big-endian {big}"
            ),
            Error::BadChecksum {
                what,
                expected,
                found,
            } => write!(
                f,
                "bad {what} checksum: recorded {expected:#x}, computed {found:#x}"
            ),
            Error::BadTagLocation { expected, found } => write!(
                f,
                "UDF tag location {found} does not match extent {expected}"
            ),
            Error::UnexpectedEndOfData => write!(f, "unexpected end of data"),
            Error::NotFound(path) => write!(f, "no such file or directory: '{path}'"),
            Error::WrongRecordType(path) => {
                write!(f, "record at '{path}' has the wrong type for this operation")
            }
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Result type for ISO 9660 operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::InvalidInput("x").kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::DirectoryTooDeep.kind(), ErrorKind::InvalidInput);
        assert_eq!(Error::InvalidIso("x").kind(), ErrorKind::InvalidIso);
        assert_eq!(
            Error::EndianMismatch {
                field: "space_size",
                little: 1,
                big: 2
            }
            .kind(),
            ErrorKind::InvalidIso
        );
        assert_eq!(Error::NotFound("/FOO".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::Internal("x").kind(), ErrorKind::Internal);
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::Other, "x")).kind(),
            ErrorKind::Io
        );
    }

    #[test]
    fn test_display_contains_context() {
        let err = Error::IdentifierTooLong {
            identifier: "VERYLONGNAME.TXT".into(),
            max_length: 12,
        };
        let msg = err.to_string();
        assert!(msg.contains("VERYLONGNAME.TXT"));
        assert!(msg.contains("12"));
    }
}
