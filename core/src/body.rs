//! Request body strategies and url-encoded form serialization.
//!
//! # Design
//! `BodyStrategy` records how a body should be produced. It does not
//! produce one. Turning it into bytes or a stream is the assembler's job,
//! which also applies the multipart > form > JSON precedence. Maps are
//! `BTreeMap`s, so keys iterate in ascending order; values of one key keep
//! insertion order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use url::form_urlencoded;

pub const FORM_MEDIA_TYPE: &str = "application/x-www-form-urlencoded";
pub const JSON_MEDIA_TYPE: &str = "application/json; charset=utf-8";

/// Multi-valued form parameters.
pub type Params = BTreeMap<String, Vec<String>>;

/// Multipart file fields, mapping field name to the file to upload.
pub type Files = BTreeMap<String, PathBuf>;

/// How a request body is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BodyStrategy {
    #[default]
    Empty,
    Form(Params),
    Json(Vec<u8>),
    Multipart { files: Files, params: Params },
}

impl BodyStrategy {
    /// Serialize `value` as a JSON body.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(BodyStrategy::Json)
    }

    /// Use already encoded JSON bytes as the body.
    pub fn json_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        BodyStrategy::Json(bytes.into())
    }

    /// Media type declared by the strategy itself. Multipart has none until
    /// the encoder picks a boundary.
    pub fn media_type(&self) -> Option<&'static str> {
        match self {
            BodyStrategy::Form(_) => Some(FORM_MEDIA_TYPE),
            BodyStrategy::Json(_) => Some(JSON_MEDIA_TYPE),
            BodyStrategy::Empty | BodyStrategy::Multipart { .. } => None,
        }
    }

    pub(crate) fn files(&self) -> Option<&Files> {
        match self {
            BodyStrategy::Multipart { files, .. } => Some(files),
            _ => None,
        }
    }

    pub(crate) fn params(&self) -> Option<&Params> {
        match self {
            BodyStrategy::Form(params) | BodyStrategy::Multipart { params, .. } => Some(params),
            _ => None,
        }
    }

    pub(crate) fn json_payload(&self) -> Option<&[u8]> {
        match self {
            BodyStrategy::Json(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Builder for an `application/x-www-form-urlencoded` body.
#[derive(Debug, Clone, Default)]
pub struct FormBody {
    params: Params,
}

impl FormBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        push_param(&mut self.params, key, value);
        self
    }

    pub fn build(self) -> BodyStrategy {
        BodyStrategy::Form(self.params)
    }
}

/// Builder for a `multipart/form-data` body.
///
/// Files are referenced by path and only opened while the body streams.
#[derive(Debug, Clone, Default)]
pub struct MultipartBody {
    files: Files,
    params: Params,
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the file at `path` under `field`. A later call with the same
    /// field replaces the earlier file.
    pub fn file(mut self, field: &str, path: impl Into<PathBuf>) -> Self {
        self.files.insert(field.to_string(), path.into());
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        push_param(&mut self.params, key, value);
        self
    }

    pub fn build(self) -> BodyStrategy {
        BodyStrategy::Multipart {
            files: self.files,
            params: self.params,
        }
    }
}

fn push_param(params: &mut Params, key: &str, value: &str) {
    params
        .entry(key.to_string())
        .or_default()
        .push(value.to_string());
}

/// Serialize params as `k=v&k=v`, one pair per value.
pub fn encode_form(params: &Params) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in params {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

/// Append `params` to `base` as a query string.
pub fn build_get_url(base: &str, params: &Params) -> String {
    let query = encode_form(params);
    if query.is_empty() {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}
