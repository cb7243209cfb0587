//! Streaming `multipart/form-data` encoder.
//!
//! # Design
//! `encode` hands the transport the read end of a [`pipe`] and starts one
//! producer thread that writes the parts into the write end. Because the pipe
//! is bounded, the producer reads a file only as fast as the transport
//! sends it, and memory use stays at one chunk window whatever the file
//! size.
//!
//! Once framing has started the stream is not aborted for a bad file: a file
//! that cannot be opened is skipped and a read error ends that part early.
//! Each such failure is logged and recorded in the [`EncodeReport`], and no
//! error reaches the dispatch call. The producer stops early only when the
//! consumer drops the body, since nobody can receive further parts.

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::body::{Files, Params};
use crate::error::PartError;
use crate::future::{completion, Completion, Publisher};
use crate::pipe::{pipe, PipeReader, PipeWriter};

/// Size of the producer's write buffer and file read buffer.
const CHUNK_SIZE: usize = 8 * 1024;

/// RFC 7578 part writer over any `Write`.
pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
    wrote_part: bool,
}

impl<W: Write> MultipartWriter<W> {
    pub fn new(inner: W, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
            wrote_part: false,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` value announcing this writer's boundary.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Start a file part. The file content is written afterwards with
    /// `Write` on this writer.
    pub fn begin_file(&mut self, field: &str, file_name: &str, content_type: &str) -> io::Result<()> {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quotes(field),
            escape_quotes(file_name)
        );
        self.begin_part(&[("Content-Disposition", &disposition), ("Content-Type", content_type)])
    }

    /// Write a complete text field part.
    pub fn write_field(&mut self, name: &str, value: &str) -> io::Result<()> {
        let disposition = format!("form-data; name=\"{}\"", escape_quotes(name));
        self.begin_part(&[("Content-Disposition", &disposition)])?;
        self.inner.write_all(value.as_bytes())
    }

    /// Write the closing delimiter and return the inner writer, flushed.
    pub fn finish(mut self) -> io::Result<W> {
        if self.wrote_part {
            write!(self.inner, "\r\n--{}--\r\n", self.boundary)?;
        } else {
            write!(self.inner, "--{}--\r\n", self.boundary)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn begin_part(&mut self, headers: &[(&str, &str)]) -> io::Result<()> {
        if self.wrote_part {
            write!(self.inner, "\r\n--{}\r\n", self.boundary)?;
        } else {
            write!(self.inner, "--{}\r\n", self.boundary)?;
        }
        self.wrote_part = true;
        for (name, value) in headers {
            write!(self.inner, "{name}: {value}\r\n")?;
        }
        self.inner.write_all(b"\r\n")
    }
}

impl<W: Write> Write for MultipartWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn new_boundary() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Part errors recorded by one multipart encode.
///
/// Clones share the same report. `wait` returns after the producer has
/// written the closing boundary (or given up on a vanished consumer).
#[derive(Clone)]
pub struct EncodeReport {
    inner: Arc<Completion<Vec<PartError>>>,
}

impl EncodeReport {
    /// Block until the producer is done and return its part errors.
    pub fn wait(&self) -> &[PartError] {
        self.inner.wait_or(Vec::new)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_ready()
    }
}

impl fmt::Debug for EncodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeReport")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Read end of a multipart encode, handed to the transport as the body.
pub struct StreamingBody {
    reader: PipeReader,
    report: EncodeReport,
}

impl StreamingBody {
    pub fn report(&self) -> EncodeReport {
        self.report.clone()
    }
}

impl Read for StreamingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingBody")
            .field("report", &self.report)
            .finish()
    }
}

/// Start streaming `files` then `params` as a multipart body.
///
/// Returns the body reader and its `Content-Type`, which carries the
/// generated boundary. `pipe_capacity` is the number of chunks that may sit
/// in the pipe ahead of the reader.
pub fn encode(files: Files, params: Params, pipe_capacity: usize) -> io::Result<(StreamingBody, String)> {
    let (writer, reader) = pipe(pipe_capacity);
    let (publisher, completion) = completion();
    let multipart = MultipartWriter::new(BufWriter::with_capacity(CHUNK_SIZE, writer), new_boundary());
    let content_type = multipart.content_type();

    thread::Builder::new()
        .name("multipart-encoder".to_string())
        .spawn(move || produce(multipart, &files, &params, publisher))?;

    let body = StreamingBody {
        reader,
        report: EncodeReport {
            inner: Arc::new(completion),
        },
    };
    Ok((body, content_type))
}

fn produce(
    mut multipart: MultipartWriter<BufWriter<PipeWriter>>,
    files: &Files,
    params: &Params,
    publisher: Publisher<Vec<PartError>>,
) {
    let mut errors = Vec::new();
    match write_parts(&mut multipart, files, params, &mut errors) {
        Ok(()) => {
            if let Err(source) = multipart.finish() {
                warn!(error = %source, "multipart consumer went away before the closing delimiter");
                errors.push(PartError::Finish { source });
            }
        }
        Err(err) => {
            warn!(field = err.field(), error = %err, "multipart consumer went away, stopping encoder");
            errors.push(err);
        }
    }
    debug!(failed_parts = errors.len(), "multipart encode finished");
    publisher.publish(errors);
}

/// Write every part. Returns `Err` only when the consumer is gone; file
/// problems are pushed to `errors` and skipped.
fn write_parts<W: Write>(
    multipart: &mut MultipartWriter<W>,
    files: &Files,
    params: &Params,
    errors: &mut Vec<PartError>,
) -> Result<(), PartError> {
    for (field, path) in files {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(source) => {
                warn!(field = %field, path = %path.display(), error = %source, "skipping multipart file");
                errors.push(PartError::Open {
                    field: field.clone(),
                    path: path.clone(),
                    source,
                });
                continue;
            }
        };

        let write_err = |source| PartError::Write {
            field: field.clone(),
            source,
        };
        multipart
            .begin_file(field, &file_name(path), &guess_content_type(path))
            .map_err(write_err)?;

        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            let n = match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    warn!(
                        field = %field,
                        path = %path.display(),
                        error = %source,
                        "multipart file part truncated"
                    );
                    errors.push(PartError::Read {
                        field: field.clone(),
                        path: path.clone(),
                        source,
                    });
                    break;
                }
            };
            multipart.write_all(&buf[..n]).map_err(write_err)?;
        }
    }

    for (key, values) in params {
        for value in values {
            multipart.write_field(key, value).map_err(|source| PartError::Write {
                field: key.clone(),
                source,
            })?;
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn guess_content_type(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}
