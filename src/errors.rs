use std::fmt;
use std::io;

/// All failure modes of the storage engine and the query layer.
///
/// `EndOfIterator` is an expected control signal rather than a failure:
/// executors return it when a scan is exhausted.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    NoFreeBuffer,
    NoSpace,
    TooLongData,
    DuplicateKey,
    InvalidPageId,
    EndOfIterator,
    JsonParse,
    InvalidCondition,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error. {}", e),
            Error::NoFreeBuffer => write!(f, "no free buffer available in buffer pool"),
            Error::NoSpace => write!(f, "no free space"),
            Error::TooLongData => write!(f, "too long data"),
            Error::DuplicateKey => write!(f, "duplicate key"),
            Error::InvalidPageId => write!(f, "invalid page id"),
            Error::EndOfIterator => write!(f, "end of iterator"),
            Error::JsonParse => write!(f, "JSON parse error"),
            Error::InvalidCondition => write!(f, "invalid condition"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}
