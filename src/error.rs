//! A custom `espial` error and result type

use core::fmt;
use core::result;
use std::error;
use std::io;

#[non_exhaustive]
#[derive(Debug)]
/// A custom `espial` error
pub enum Error {
    /// The plugin or string-table file could not be opened, read, or written
    Io(io::Error),
    /// A scalar could not be read from or written to a buffer
    Scroll(scroll::Error),
    /// The entity at the given offset does not obey the container format
    Malformed(String),
    /// A compressed record payload did not inflate to its declared length
    Decompress {
        /// Uncompressed length declared in the record
        expected: usize,
        /// Length the zlib stream actually produced
        actual: usize,
    },
    /// The zlib encoder failed while re-compressing a record payload
    Compress(String),
    /// An edited subrecord exceeds the 16-bit on-wire size field
    SubrecordTooLarge {
        /// Subrecord signature
        sig: [u8; 4],
        /// Byte length of the edit
        len: usize,
    },
    /// A string-table sidecar file does not obey the directory format
    StringsFormat(String),
    /// A string-table sidecar file could not be read
    StringsIo(io::Error),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Io(ref io) => Some(io),
            Error::Scroll(ref scroll) => Some(scroll),
            Error::StringsIo(ref io) => Some(io),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref err) => write!(fmt, "{}", err),
            Error::Scroll(ref err) => write!(fmt, "{}", err),
            Error::Malformed(ref msg) => write!(fmt, "Malformed entity: {}", msg),
            Error::Decompress { expected, actual } => write!(
                fmt,
                "zlib stream inflated to {} bytes, declared {}",
                actual, expected
            ),
            Error::Compress(ref msg) => write!(fmt, "Deflate failed: {}", msg),
            Error::SubrecordTooLarge { ref sig, len } => write!(
                fmt,
                "Subrecord {} edit is {} bytes, limit is 65535",
                String::from_utf8_lossy(sig),
                len
            ),
            Error::StringsFormat(ref msg) => write!(fmt, "Malformed strings file: {}", msg),
            Error::StringsIo(ref err) => write!(fmt, "Strings file i/o: {}", err),
        }
    }
}

/// An impish result type
pub type Result<T> = result::Result<T, Error>;
