//! Request assembly and dispatch core for a host-supplied HTTP transport.
//!
//! # Overview
//! Builds `HttpRequest` values, streams multipart bodies and runs requests
//! through a `Transport` the host implements (host-does-IO pattern). The
//! core owns the concurrency: synchronous, future-based and callback-based
//! dispatch, and a producer thread per multipart body coupled to the
//! transport through a bounded pipe.
//!
//! # Design
//! - `RequestAssembler` validates the URL and picks exactly one body
//!   encoding (multipart > form > JSON > empty).
//! - Multipart bodies are produced while the transport reads them; memory
//!   stays bounded and per-file failures are reported, not propagated.
//! - `Dispatcher` injects the configured `User-Agent` in every mode and runs
//!   background work on a bounded worker pool.
//! - `ResponseFuture` publishes its outcome once and can be read repeatedly.

pub mod body;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod http;
pub mod multipart;
pub mod pipe;
pub mod request;
pub mod transport;

pub use body::{build_get_url, encode_form, BodyStrategy, Files, FormBody, MultipartBody, Params};
pub use config::DispatcherConfig;
pub use dispatch::Dispatcher;
pub use error::{BuildError, PartError, TransportError};
pub use future::ResponseFuture;
pub use http::{Headers, HttpMethod, HttpRequest, HttpResponse, RequestBody, ResponseBody};
pub use multipart::{EncodeReport, StreamingBody};
pub use request::{RequestAssembler, RequestBuilder};
pub use transport::{from_fn, Transport};
