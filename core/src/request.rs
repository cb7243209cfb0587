//! Request assembly: URL validation, content type and body selection.
//!
//! # Design
//! `RequestAssembler::build` is the only way to obtain an `HttpRequest`, so
//! every request that reaches a transport has a parsed absolute URL. For the
//! body-carrying methods exactly one encoding is chosen, in this order:
//! multipart when any file is attached, else url-encoded form when any
//! param is present, else raw JSON bytes, else no body.
//!
//! `RequestBuilder` is the fluent front end that collects the pieces and
//! feeds them to an assembler.

use url::Url;

use crate::body::{encode_form, BodyStrategy, FORM_MEDIA_TYPE};
use crate::error::BuildError;
use crate::http::{Headers, HttpMethod, HttpRequest, RequestBody};
use crate::multipart;

pub const CONTENT_TYPE: &str = "Content-Type";

/// Chunks the multipart pipe may hold ahead of the transport. Zero makes
/// every write wait for the transport to read.
pub const DEFAULT_PIPE_CAPACITY: usize = 0;

/// Turns method, URL, headers and a body strategy into an `HttpRequest`.
#[derive(Debug, Clone)]
pub struct RequestAssembler {
    pipe_capacity: usize,
}

impl Default for RequestAssembler {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    pub fn build(
        &self,
        method: HttpMethod,
        url: &str,
        mut headers: Headers,
        body: BodyStrategy,
    ) -> Result<HttpRequest, BuildError> {
        let url = parse_url(url)?;

        if !method.allows_body() {
            return Ok(HttpRequest::new(method, url, headers, RequestBody::Empty));
        }

        if let Some(media_type) = body.media_type() {
            headers.set(CONTENT_TYPE, media_type);
        }

        let body = match (select(&body), body) {
            (Selected::Multipart, BodyStrategy::Multipart { files, params }) => {
                let (stream, content_type) =
                    multipart::encode(files, params, self.pipe_capacity).map_err(BuildError::EncoderSpawn)?;
                headers.set(CONTENT_TYPE, &content_type);
                RequestBody::Stream(stream)
            }
            (Selected::Form, BodyStrategy::Form(params) | BodyStrategy::Multipart { params, .. }) => {
                headers.set(CONTENT_TYPE, FORM_MEDIA_TYPE);
                RequestBody::Bytes(encode_form(&params).into_bytes())
            }
            (Selected::Json, BodyStrategy::Json(bytes)) => RequestBody::Bytes(bytes),
            _ => RequestBody::Empty,
        };

        Ok(HttpRequest::new(method, url, headers, body))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Selected {
    Multipart,
    Form,
    Json,
    Empty,
}

fn select(body: &BodyStrategy) -> Selected {
    if body.files().is_some_and(|files| !files.is_empty()) {
        Selected::Multipart
    } else if body.params().is_some_and(|params| !params.is_empty()) {
        Selected::Form
    } else if body.json_payload().is_some_and(|json| !json.is_empty()) {
        Selected::Json
    } else {
        Selected::Empty
    }
}

fn parse_url(raw: &str) -> Result<Url, BuildError> {
    if raw.is_empty() {
        return Err(BuildError::EmptyUrl);
    }
    let url = Url::parse(raw).map_err(|source| BuildError::UrlParse {
        url: raw.to_string(),
        source,
    })?;
    if url.host_str().is_none() {
        return Err(BuildError::UrlParse {
            url: raw.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }
    Ok(url)
}

/// Fluent request description. Defaults to `GET` with no body.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    url: String,
    headers: Headers,
    body: BodyStrategy,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            method: HttpMethod::Get,
            url: String::new(),
            headers: Headers::new(),
            body: BodyStrategy::Empty,
        }
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append a `name=value` pair as a `Cookie` header value.
    pub fn cookie(mut self, name: &str, value: &str) -> Self {
        self.headers.append("Cookie", &format!("{name}={value}"));
        self
    }

    pub fn get(self) -> Self {
        self.method(HttpMethod::Get, BodyStrategy::Empty)
    }

    pub fn head(self) -> Self {
        self.method(HttpMethod::Head, BodyStrategy::Empty)
    }

    pub fn post(self, body: BodyStrategy) -> Self {
        self.method(HttpMethod::Post, body)
    }

    pub fn put(self, body: BodyStrategy) -> Self {
        self.method(HttpMethod::Put, body)
    }

    pub fn patch(self, body: BodyStrategy) -> Self {
        self.method(HttpMethod::Patch, body)
    }

    pub fn delete(self) -> Self {
        self.method(HttpMethod::Delete, BodyStrategy::Empty)
    }

    pub fn delete_with_body(self, body: BodyStrategy) -> Self {
        self.method(HttpMethod::Delete, body)
    }

    pub fn build(self) -> Result<HttpRequest, BuildError> {
        self.build_with(&RequestAssembler::default())
    }

    pub fn build_with(self, assembler: &RequestAssembler) -> Result<HttpRequest, BuildError> {
        assembler.build(self.method, &self.url, self.headers, self.body)
    }

    fn method(mut self, method: HttpMethod, body: BodyStrategy) -> Self {
        self.method = method;
        self.body = body;
        self
    }
}
