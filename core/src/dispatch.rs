//! Synchronous, future-based and callback-based dispatch over a `Transport`.
//!
//! # Design
//! All three modes share `run`, which injects the configured `User-Agent`
//! and calls the transport. `execute` calls it on the caller's thread.
//! `submit` and `dispatch_async` enqueue a job on a fixed pool of worker
//! threads fed by a bounded queue, so the number of in-flight requests is
//! capped by configuration. When the queue is full, enqueueing blocks the
//! caller. Work dispatched from a worker thread, such as a callback that
//! calls `submit(..).get()`, bypasses the queue and gets its own thread, so
//! a worker never waits on a job queued behind itself.
//!
//! A dispatched request goes `Pending -> Succeeded | Failed` exactly once.
//! There is no cancellation and no retry, and the only timeouts are the
//! transport's own.

use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, SendError, Sender};
use tracing::{debug, error, warn};

use crate::config::DispatcherConfig;
use crate::error::TransportError;
use crate::future::{completion, ResponseFuture};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::Transport;

pub const USER_AGENT: &str = "User-Agent";

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Entry point for sending `HttpRequest`s through a `Transport`.
pub struct Dispatcher<T> {
    shared: Arc<Shared<T>>,
    pool: WorkerPool,
}

struct Shared<T> {
    transport: T,
    user_agent: String,
}

impl<T: Transport> Shared<T> {
    fn run(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        request.headers_mut().set(USER_AGENT, &self.user_agent);
        debug!(method = %request.method(), url = %request.url(), "dispatching request");
        self.transport.execute(request)
    }
}

impl<T: Transport + 'static> Dispatcher<T> {
    /// Start the worker pool. Fails only if a worker thread cannot be
    /// spawned.
    pub fn new(transport: T, config: DispatcherConfig) -> io::Result<Self> {
        let pool = WorkerPool::new(config.workers.max(1), config.queue_capacity)?;
        Ok(Self {
            shared: Arc::new(Shared {
                transport,
                user_agent: config.user_agent,
            }),
            pool,
        })
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Send `request` on the calling thread and wait for the outcome.
    pub fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.shared.run(request)
    }

    /// Queue `request` and return a handle to its outcome.
    ///
    /// Blocks only while the job queue is full. Called from a worker thread,
    /// the job skips the queue and runs on a thread of its own.
    pub fn submit(&self, request: HttpRequest) -> ResponseFuture {
        let (publisher, completion) = completion();
        let shared = Arc::clone(&self.shared);
        self.spawn(Box::new(move || publisher.publish(shared.run(request))));
        ResponseFuture::new(completion)
    }

    /// Queue `request` and hand its outcome to exactly one of the callbacks.
    ///
    /// The callback runs after the transport returns, on the thread that ran
    /// it. A panicking transport is reported as `TransportError::Interrupted`.
    pub fn dispatch_async<S, F>(&self, request: HttpRequest, on_response: S, on_failure: F)
    where
        S: FnOnce(HttpResponse) + Send + 'static,
        F: FnOnce(TransportError) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.spawn(Box::new(move || {
            let run = panic::catch_unwind(AssertUnwindSafe(|| shared.run(request)));
            let outcome = run.unwrap_or_else(|_| {
                error!("transport panicked during callback dispatch");
                Err(TransportError::Interrupted)
            });
            match outcome {
                Ok(response) => on_response(response),
                Err(err) => on_failure(err),
            }
        }));
    }

    /// Stop accepting work, finish the queued jobs and join the workers.
    ///
    /// Must not be called from inside a dispatch callback.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }

    fn spawn(&self, job: Job) {
        if ON_WORKER.with(Cell::get) {
            debug!("dispatch from a worker thread, running job on a dedicated thread");
            spawn_dedicated("dispatch-nested", job);
            return;
        }
        if let Err(SendError(job)) = self.pool.execute(job) {
            // Every worker is gone; keep the exactly-once promise anyway.
            warn!("dispatch workers unavailable, running job on a dedicated thread");
            spawn_dedicated("dispatch-fallback", job);
        }
    }
}

fn spawn_dedicated(name: &str, job: Job) {
    if let Err(err) = thread::Builder::new().name(name.to_string()).spawn(job) {
        error!(error = %err, thread = name, "failed to spawn dedicated dispatch thread");
    }
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("user_agent", &self.shared.user_agent)
            .field("workers", &self.pool.workers.len())
            .finish()
    }
}

struct WorkerPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new(workers: usize, queue_capacity: usize) -> io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("dispatch-worker-{id}"))
                .spawn(move || worker_loop(rx))?;
            handles.push(handle);
        }
        Ok(Self {
            jobs: Some(tx),
            workers: handles,
        })
    }

    fn execute(&self, job: Job) -> Result<(), SendError<Job>> {
        match &self.jobs {
            Some(tx) => tx.send(job),
            None => Err(SendError(job)),
        }
    }

    fn shutdown(mut self) {
        self.jobs = None;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("dispatch worker panicked outside a job");
            }
        }
    }
}

fn worker_loop(rx: Receiver<Job>) {
    ON_WORKER.with(|flag| flag.set(true));
    while let Ok(job) = rx.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("dispatch job panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpMethod, ResponseBody};
    use crate::request::RequestBuilder;
    use crate::transport::from_fn;
    use std::sync::mpsc;
    use std::time::Duration;

    fn request(path: &str) -> HttpRequest {
        RequestBuilder::new()
            .url(&format!("http://localhost{path}"))
            .build()
            .unwrap()
    }

    fn echo_agent(request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = request.headers().get(USER_AGENT).unwrap_or_default().to_string();
        Ok(HttpResponse::new(200, "200 OK", ResponseBody::new(io::Cursor::new(agent))))
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig::default().with_user_agent("courier-test").with_workers(2)
    }

    #[test]
    fn user_agent_injected_in_every_mode() {
        let dispatcher = Dispatcher::new(from_fn(echo_agent), config()).unwrap();

        let sync = dispatcher.execute(request("/sync")).unwrap();
        assert_eq!(sync.body_string().unwrap(), "courier-test");

        let future = dispatcher.submit(request("/future")).wait().unwrap();
        assert_eq!(future.body_string().unwrap(), "courier-test");

        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch_async(
            request("/callback"),
            move |response| tx.send(response.body_string().unwrap()).unwrap(),
            |err| panic!("unexpected failure: {err}"),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "courier-test");
        dispatcher.shutdown();
    }

    #[test]
    fn configured_agent_replaces_caller_header() {
        let dispatcher = Dispatcher::new(from_fn(echo_agent), config()).unwrap();
        let request = RequestBuilder::new()
            .url("http://localhost/")
            .header(USER_AGENT, "caller-agent")
            .build()
            .unwrap();
        assert_eq!(dispatcher.execute(request).unwrap().body_string().unwrap(), "courier-test");
    }

    #[test]
    fn failure_goes_to_failure_callback() {
        let transport = from_fn(|_| Err(TransportError::Network("connection refused".to_string())));
        let dispatcher = Dispatcher::new(transport, config()).unwrap();

        let (tx, rx) = mpsc::channel();
        let on_ok = tx.clone();
        dispatcher.dispatch_async(
            request("/"),
            move |_| on_ok.send("response").unwrap(),
            move |_| tx.send("failure").unwrap(),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "failure");
        dispatcher.shutdown();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn panicking_transport_interrupts_future_and_keeps_worker() {
        let transport = from_fn(|request: HttpRequest| {
            if request.url().path() == "/boom" {
                panic!("transport blew up");
            }
            Ok(HttpResponse::new(204, "204 No Content", ResponseBody::empty()))
        });
        let dispatcher = Dispatcher::new(transport, config().with_workers(1)).unwrap();

        let failed = dispatcher.submit(request("/boom"));
        assert!(matches!(failed.get(), Err(TransportError::Interrupted)));

        let ok = dispatcher.submit(request("/fine"));
        assert_eq!(ok.get().unwrap().status_code, 204);
        dispatcher.shutdown();
    }

    #[test]
    fn panicking_transport_reaches_failure_callback() {
        let transport = from_fn(|_| -> Result<HttpResponse, TransportError> { panic!("transport blew up") });
        let dispatcher = Dispatcher::new(transport, config().with_workers(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        let on_ok = tx.clone();
        dispatcher.dispatch_async(
            request("/boom"),
            move |_| on_ok.send("response".to_string()).unwrap(),
            move |err| tx.send(format!("failure: {err:?}")).unwrap(),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "failure: Interrupted");
        dispatcher.shutdown();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn panicking_response_callback_does_not_trigger_failure() {
        let dispatcher = Dispatcher::new(from_fn(echo_agent), config().with_workers(1)).unwrap();

        let (tx, rx) = mpsc::channel();
        dispatcher.dispatch_async(
            request("/"),
            |_| panic!("callback blew up"),
            move |_| tx.send(()).unwrap(),
        );
        let after = dispatcher.submit(request("/after"));
        assert_eq!(after.get().unwrap().status_code, 200);
        dispatcher.shutdown();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn callback_can_wait_on_nested_submit() {
        let dispatcher = Arc::new(Dispatcher::new(from_fn(echo_agent), config().with_workers(1)).unwrap());

        let (tx, rx) = mpsc::channel();
        let nested = Arc::clone(&dispatcher);
        dispatcher.dispatch_async(
            request("/outer"),
            move |_| {
                let inner = nested.submit(request("/inner"));
                tx.send(inner.wait().unwrap().body_string().unwrap()).unwrap();
            },
            |err| panic!("unexpected failure: {err}"),
        );
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "courier-test");
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let (tx, rx) = mpsc::channel();
        let transport = from_fn(move |request: HttpRequest| {
            tx.send(request.method()).unwrap();
            Ok(HttpResponse::new(200, "200 OK", ResponseBody::empty()))
        });
        let dispatcher = Dispatcher::new(transport, config().with_workers(1).with_queue_capacity(16)).unwrap();
        let futures: Vec<_> = (0..8).map(|i| dispatcher.submit(request(&format!("/{i}")))).collect();
        dispatcher.shutdown();

        assert_eq!(rx.try_iter().filter(|m| *m == HttpMethod::Get).count(), 8);
        assert!(futures.iter().all(ResponseFuture::is_ready));
    }
}
