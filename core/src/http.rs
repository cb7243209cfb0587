//! HTTP request and response descriptors exchanged with the transport.
//!
//! # Design
//! These types describe an HTTP exchange as data. The core builds
//! `HttpRequest` values and reads `HttpResponse` values; the host supplied
//! `Transport` performs the actual I/O in between. Unlike plain data, a
//! request body may be a live stream fed by a multipart producer thread, and
//! a response body is a scoped reader that must be released exactly once.

use std::fmt;
use std::io::{self, Read};

use tracing::warn;
use url::Url;

use crate::multipart::{EncodeReport, StreamingBody};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Whether the assembler attaches a body for this method.
    pub fn allows_body(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-valued header map.
///
/// Names compare case-insensitively and keep the spelling of their first
/// insertion. Names and their values are kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `value` after any existing values of `name`.
    pub fn append(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
    }

    /// Replace every value of `name` with `value`.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.position(name) {
            Some(i) => self.entries[i].1 = vec![value.to_string()],
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    pub fn remove(&mut self, name: &str) -> Vec<String> {
        match self.position(name) {
            Some(i) => self.entries.remove(i).1,
            None => Vec::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Iterate over `(name, value)` pairs, one pair per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }
}

/// Body attached to an outgoing request.
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// Produced concurrently by a multipart encoder; length unknown.
    Stream(StreamingBody),
}

impl RequestBody {
    /// Length in bytes when known up front. Streams report `None` and are
    /// expected to be sent chunked.
    pub fn content_length(&self) -> Option<u64> {
        match self {
            RequestBody::Empty => Some(0),
            RequestBody::Bytes(bytes) => Some(bytes.len() as u64),
            RequestBody::Stream(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            RequestBody::Stream(stream) => f.debug_tuple("Stream").field(stream).finish(),
        }
    }
}

/// A finished request, ready for dispatch.
///
/// Built by `RequestAssembler::build`. Read-only from the outside; the
/// dispatcher only touches it to inject the identification header.
#[derive(Debug)]
pub struct HttpRequest {
    method: HttpMethod,
    url: Url,
    headers: Headers,
    body: RequestBody,
}

impl HttpRequest {
    pub(crate) fn new(method: HttpMethod, url: Url, headers: Headers, body: RequestBody) -> Self {
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Per-part error report of a streamed multipart body.
    pub fn multipart_report(&self) -> Option<EncodeReport> {
        match &self.body {
            RequestBody::Stream(stream) => Some(stream.report()),
            _ => None,
        }
    }

    pub fn into_body(self) -> RequestBody {
        self.body
    }

    pub fn into_parts(self) -> (HttpMethod, Url, Headers, RequestBody) {
        (self.method, self.url, self.headers, self.body)
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
}

type CloseHook = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// Scoped response body reader.
///
/// `materialize` may run once (it consumes the body). The close hook, which
/// stands for releasing the underlying connection, runs exactly once: right
/// after materialization, or on drop when the body was never read.
pub struct ResponseBody {
    reader: Option<Box<dyn Read + Send>>,
    on_close: Option<CloseHook>,
}

impl ResponseBody {
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Some(Box::new(reader)),
            on_close: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(io::empty())
    }

    /// Register the release action for the underlying resource.
    pub fn with_close(mut self, hook: impl FnOnce() -> io::Result<()> + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    /// Read the body to the end and release the resource.
    ///
    /// A release failure is logged and does not replace the read outcome.
    pub fn materialize(mut self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        let result = match self.reader.take() {
            Some(mut reader) => reader.read_to_end(&mut bytes).map(|_| bytes),
            None => Ok(bytes),
        };
        self.close();
        result
    }

    fn close(&mut self) {
        self.reader = None;
        if let Some(hook) = self.on_close.take() {
            if let Err(err) = hook() {
                warn!(error = %err, "failed to release response body");
            }
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("consumed", &self.reader.is_none())
            .finish()
    }
}

/// A response returned by the transport.
///
/// Status codes are data: a 404 is a successful exchange as far as the core
/// is concerned.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status line, e.g. `"200 OK"`.
    pub status: String,
    pub status_code: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status_code: u16, status: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            status: status.into(),
            status_code,
            headers: Headers::new(),
            body,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn body_bytes(self) -> io::Result<Vec<u8>> {
        self.body.materialize()
    }

    pub fn body_string(self) -> io::Result<String> {
        let bytes = self.body.materialize()?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_body(data: &'static [u8], closes: &Arc<AtomicUsize>) -> ResponseBody {
        let closes = Arc::clone(closes);
        ResponseBody::new(data).with_close(move || {
            closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn headers_are_case_insensitive_and_multi_valued() {
        let mut headers = Headers::new();
        headers.append("Accept", "text/html");
        headers.append("accept", "application/json");
        headers.append("X-Trace", "1");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("ACCEPT"), Some("text/html"));
        assert_eq!(headers.get_all("accept"), ["text/html", "application/json"]);

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("Accept", "text/html"),
                ("Accept", "application/json"),
                ("X-Trace", "1"),
            ]
        );
    }

    #[test]
    fn set_replaces_all_values() {
        let mut headers: Headers = [("User-Agent", "a"), ("user-agent", "b")].into_iter().collect();
        headers.set("USER-AGENT", "c");
        assert_eq!(headers.get_all("user-agent"), ["c"]);
        assert_eq!(headers.remove("User-Agent"), vec!["c".to_string()]);
        assert!(headers.is_empty());
    }

    #[test]
    fn method_body_rules() {
        assert!(HttpMethod::Post.allows_body());
        assert!(HttpMethod::Delete.allows_body());
        assert!(!HttpMethod::Get.allows_body());
        assert!(!HttpMethod::Head.allows_body());
        assert_eq!(HttpMethod::Patch.to_string(), "PATCH");
    }

    #[test]
    fn materialize_reads_and_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let body = counting_body(b"hello", &closes);
        assert_eq!(body.materialize().unwrap(), b"hello");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_unread_body_closes_it() {
        let closes = Arc::new(AtomicUsize::new(0));
        drop(counting_body(b"never read", &closes));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn read_error_still_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let body = ResponseBody::new(FailingReader).with_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let err = body.materialize().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_error_does_not_mask_result() {
        let body = ResponseBody::new(&b"payload"[..])
            .with_close(|| Err(io::Error::new(io::ErrorKind::Other, "close failed")));
        assert_eq!(body.materialize().unwrap(), b"payload");
    }

    #[test]
    fn body_string_rejects_invalid_utf8() {
        let response = HttpResponse::new(200, "200 OK", ResponseBody::new(&[0xff, 0xfe][..]));
        let err = response.body_string().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn status_codes_are_data() {
        let response = HttpResponse::new(404, "404 Not Found", ResponseBody::empty());
        assert!(!response.is_success());
        assert_eq!(response.status, "404 Not Found");
    }
}
