//! Publish-once result cells.
//!
//! # Design
//! A `Publisher` owns the sending half of a one-slot channel and is consumed
//! by `publish`, so the producer side can deliver at most one value. The
//! receiving `Completion` caches the first value it takes out of the channel
//! in a `OnceLock`. Only the first wait blocks; every later read returns the
//! cached value. If the publisher is dropped unpublished (its task panicked),
//! waiters get a caller-supplied fallback instead of blocking forever.

use std::sync::OnceLock;

use crossbeam_channel::{Receiver, Sender};

use crate::error::TransportError;
use crate::http::HttpResponse;

pub(crate) fn completion<T>() -> (Publisher<T>, Completion<T>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (
        Publisher { tx },
        Completion {
            rx,
            slot: OnceLock::new(),
        },
    )
}

pub(crate) struct Publisher<T> {
    tx: Sender<T>,
}

impl<T> Publisher<T> {
    pub(crate) fn publish(self, value: T) {
        // The completion may already be gone; nobody is waiting then.
        let _ = self.tx.send(value);
    }
}

pub(crate) struct Completion<T> {
    rx: Receiver<T>,
    slot: OnceLock<T>,
}

impl<T> Completion<T> {
    pub(crate) fn wait_or(&self, lost: impl FnOnce() -> T) -> &T {
        self.slot.get_or_init(|| self.rx.recv().unwrap_or_else(|_| lost()))
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.slot.get().is_some() || !self.rx.is_empty()
    }

    pub(crate) fn into_inner_or(self, lost: impl FnOnce() -> T) -> T {
        match self.slot.into_inner() {
            Some(value) => value,
            None => self.rx.recv().unwrap_or_else(|_| lost()),
        }
    }
}

/// Handle to the outcome of `Dispatcher::submit`.
///
/// `get` blocks until the request completes and then returns the same
/// cached outcome on every call without touching the transport again.
/// Use `wait` to take ownership of the response, e.g. to read its body.
pub struct ResponseFuture {
    completion: Completion<Result<HttpResponse, TransportError>>,
}

impl ResponseFuture {
    pub(crate) fn new(completion: Completion<Result<HttpResponse, TransportError>>) -> Self {
        Self { completion }
    }

    /// Block until the outcome is available; later calls return at once.
    pub fn get(&self) -> Result<&HttpResponse, &TransportError> {
        self.completion
            .wait_or(|| Err(TransportError::Interrupted))
            .as_ref()
    }

    /// True once the outcome can be read without blocking.
    pub fn is_ready(&self) -> bool {
        self.completion.is_ready()
    }

    /// Block until the outcome is available and take it.
    pub fn wait(self) -> Result<HttpResponse, TransportError> {
        self.completion
            .into_inner_or(|| Err(TransportError::Interrupted))
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("ready", &self.is_ready())
            .finish()
    }
}
