//! Error handling for the http server

use std::io;

/// A Result for internal operations.
pub type Result<T> = ::std::result::Result<T, Error>;

/// All errors which might arise within the application
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    /// The byte stream can't be read as an HTTP message
    Framing(&'static str),
    LineTooLong,
    HeadersTooLarge,
    BodyTooLarge,
    PathNotInOriginForm,
    IllegalPercentEncoding,
    PathTraversal,
    MalformedCgiOutput,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<httparse::InvalidChunkSize> for Error {
    fn from(_: httparse::InvalidChunkSize) -> Error {
        Error::Framing("invalid chunk size line")
    }
}
