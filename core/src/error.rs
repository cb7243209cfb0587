//! Error types for request assembly, dispatch and multipart streaming.
//!
//! # Design
//! The three enums follow the three failure classes of the core:
//! `BuildError` is returned synchronously while assembling a request,
//! `TransportError` travels through whichever dispatch mode was used, and
//! `PartError` is never returned from a dispatch call at all. Part errors are
//! collected in an `EncodeReport` while the multipart stream keeps going.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning builder input into an `HttpRequest`.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("request url can not be empty")]
    EmptyUrl,

    #[error("invalid request url {url:?}: {source}")]
    UrlParse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The multipart producer thread could not be started.
    #[error("failed to start multipart encoder: {0}")]
    EncoderSpawn(#[source] io::Error),
}

/// Errors surfaced by a `Transport` or by the dispatcher itself.
///
/// A non-2xx status is not an error; it arrives as an ordinary
/// `HttpResponse`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The task running the request ended without producing an outcome,
    /// typically because the transport panicked.
    #[error("request task ended before producing a result")]
    Interrupted,
}

/// A multipart part that could not be written in full.
#[derive(Debug, Error)]
pub enum PartError {
    #[error("failed to open {} for field {field:?}: {source}", .path.display())]
    Open {
        field: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {} for field {field:?}: {source}", .path.display())]
    Read {
        field: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The body consumer went away; no further parts were written.
    #[error("body stream closed while writing field {field:?}: {source}")]
    Write {
        field: String,
        #[source]
        source: io::Error,
    },

    /// Every part went out but the closing delimiter did not.
    #[error("body stream closed while writing the closing delimiter: {source}")]
    Finish {
        #[source]
        source: io::Error,
    },
}

impl PartError {
    /// Name of the form field the error belongs to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            PartError::Open { field, .. }
            | PartError::Read { field, .. }
            | PartError::Write { field, .. } => Some(field),
            PartError::Finish { .. } => None,
        }
    }
}
