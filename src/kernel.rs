//! The HTTP kernel.
//!
//! [`Kernel::handle`] is the whole request lifecycle: bootstrap once, tag the
//! request, send it through the middleware stack to the router, and turn any
//! fault (or panic) along the way into a response. It always returns a
//! [`Response`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use futures::FutureExt;
use http::StatusCode;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::exceptions::ExceptionHandler;
use crate::fault::{Fault, GenericFault};
use crate::handler::BoxFuture;
use crate::middleware::{Middleware, Pipeline, Registry, Resolve, Stack, Stage};
use crate::request::Request;
use crate::response::Response;
use crate::router::Dispatch;

// ── Bootstrap ─────────────────────────────────────────────────────────────────

/// One step of application start-up: loading configuration, registering
/// providers, warming caches.
pub trait Bootstrapper: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn bootstrap(&self) -> Result<(), Fault>;
}

/// A [`Bootstrapper`] from a name and a closure.
pub fn bootstrapper<F>(name: &'static str, run: F) -> impl Bootstrapper
where
    F: Fn() -> Result<(), Fault> + Send + Sync + 'static,
{
    FnBootstrapper { name, run }
}

struct FnBootstrapper<F> {
    name: &'static str,
    run: F,
}

impl<F> Bootstrapper for FnBootstrapper<F>
where
    F: Fn() -> Result<(), Fault> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn bootstrap(&self) -> Result<(), Fault> {
        (self.run)()
    }
}

/// Runs its steps once. The first caller claims the run; everyone after it,
/// including callers arriving while it is still in progress, skips it.
struct Bootstrap {
    done: AtomicBool,
    steps: Vec<Box<dyn Bootstrapper>>,
}

impl Bootstrap {
    fn run(&self) -> Result<(), Fault> {
        if self
            .done
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        for step in &self.steps {
            info!(bootstrapper = step.name(), "bootstrapping");
            step.bootstrap()
                .map_err(|fault| Fault::wrap(format!("bootstrapper `{}` failed", step.name()), fault))?;
        }
        info!(steps = self.steps.len(), "kernel bootstrapped");
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

// ── CurrentRequest ────────────────────────────────────────────────────────────

/// Marks a request as the one the kernel is currently handling.
///
/// Inserted into the request's attributes before the first stage runs, so
/// stages and handlers can read it with
/// `req.attributes().get::<CurrentRequest>()`.
#[derive(Clone, Copy, Debug)]
pub struct CurrentRequest {
    id: u64,
    received_at: Instant,
}

impl CurrentRequest {
    /// Per-kernel sequence number, starting at zero.
    pub fn id(&self) -> u64 { self.id }
    pub fn received_at(&self) -> Instant { self.received_at }

    pub fn of(req: &Request) -> Option<&Self> {
        req.attributes().get::<Self>()
    }
}

// ── Kernel ────────────────────────────────────────────────────────────────────

/// Orchestrates one request from arrival to response.
///
/// Cheap to clone; clones share the stack, the router, the exception handler
/// and the bootstrap state.
///
/// ```rust
/// use keel::{Kernel, Request, Response, Router};
/// use bytes::Bytes;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), keel::Error> {
/// async fn hello(_req: Request) -> Response {
///     Response::text("hello")
/// }
///
/// let kernel = Kernel::builder(Router::new().get("/", hello)).build()?;
///
/// let req = http::Request::builder().uri("/").body(Bytes::new()).unwrap();
/// let response = kernel.handle(req.into()).await;
/// assert_eq!(response.body(), b"hello");
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<Inner>,
}

struct Inner {
    stack: Stack,
    router: Arc<dyn Dispatch>,
    exceptions: ExceptionHandler,
    bootstrap: Bootstrap,
    sequence: AtomicU64,
}

impl Kernel {
    pub fn builder(router: impl Dispatch) -> KernelBuilder {
        KernelBuilder {
            router: Arc::new(router),
            registry: Registry::new(),
            stages: Vec::new(),
            bootstrappers: Vec::new(),
            exceptions: ExceptionHandler::default(),
        }
    }

    /// Handles one request. Never fails and never panics.
    pub async fn handle(&self, req: Request) -> Response {
        let snapshot = req.clone();

        let fault = match AssertUnwindSafe(self.send_through_router(req)).catch_unwind().await {
            Ok(Ok(response)) => return response,
            Ok(Err(fault)) => fault,
            Err(payload) => GenericFault::from_panic(&*payload).into(),
        };

        self.render_fault(&snapshot, fault)
    }

    /// Runs the bootstrappers now instead of on the first request.
    /// Does nothing if they already ran.
    pub fn bootstrap(&self) -> Result<(), Fault> {
        self.inner.bootstrap.run()
    }

    pub fn has_been_bootstrapped(&self) -> bool {
        self.inner.bootstrap.is_done()
    }

    /// The resolved middleware stack, outermost first.
    pub fn stack(&self) -> &Stack {
        &self.inner.stack
    }

    pub fn exception_handler(&self) -> &ExceptionHandler {
        &self.inner.exceptions
    }

    fn send_through_router(&self, mut req: Request) -> BoxFuture {
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            inner.bootstrap.run()?;

            req.attributes_mut().insert(CurrentRequest {
                id: inner.sequence.fetch_add(1, Ordering::Relaxed),
                received_at: Instant::now(),
            });

            let router = Arc::clone(&inner.router);
            Pipeline::through(inner.stack.clone())
                .send(req)
                .then(move |req: Request| router.dispatch(req))
                .await
        })
    }

    /// Reports and renders a fault. A panicking reporter does not stop
    /// rendering. A panic while rendering yields a bare response that still
    /// carries the fault's status.
    fn render_fault(&self, req: &Request, fault: Fault) -> Response {
        let exceptions = &self.inner.exceptions;

        if panic::catch_unwind(AssertUnwindSafe(|| exceptions.report(&fault))).is_err() {
            error!(fault = %fault, "reporter panicked while reporting a fault");
        }

        let status = fault.unwrapped().status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        panic::catch_unwind(AssertUnwindSafe(|| exceptions.render(req, fault))).unwrap_or_else(|_| {
            error!(status = status.as_u16(), "exception handler panicked while rendering a fault");
            let reason = if status.is_server_error() {
                "Server Error"
            } else {
                status.canonical_reason().unwrap_or("Error")
            };
            Response::builder().status(status).text(reason)
        })
    }
}

// ── KernelBuilder ─────────────────────────────────────────────────────────────

/// Configures a [`Kernel`]. Obtain via [`Kernel::builder`].
///
/// ```rust
/// use keel::{Kernel, Outcome, Request, Router, bootstrapper, middleware::{Next, Stage, trace}};
///
/// async fn auth(req: Request, next: Next) -> Outcome { next.run(req).await }
/// async fn session(req: Request, next: Next) -> Outcome { next.run(req).await }
///
/// let kernel = Kernel::builder(Router::new())
///     .middleware(trace::stage())
///     .middleware(Stage::group("web"))
///     .alias("auth", auth)
///     .alias("session", session)
///     .group("web", [Stage::alias("auth"), Stage::alias("session")])
///     .priority(["session", "auth"])
///     .bootstrapper(bootstrapper("config", || Ok(())))
///     .build()
///     .unwrap();
///
/// assert_eq!(kernel.stack().names(), ["trace", "session", "auth"]);
/// ```
pub struct KernelBuilder {
    router: Arc<dyn Dispatch>,
    registry: Registry,
    stages: Vec<Stage>,
    bootstrappers: Vec<Box<dyn Bootstrapper>>,
    exceptions: ExceptionHandler,
}

impl KernelBuilder {
    /// Appends a stage to the global stack.
    pub fn middleware(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn alias(mut self, name: impl Into<String>, middleware: impl Middleware) -> Self {
        self.registry.alias(name, middleware);
        self
    }

    pub fn group(mut self, name: impl Into<String>, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.registry.group(name, stages);
        self
    }

    pub fn priority<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.registry.set_priority(names);
        self
    }

    /// Resolver consulted for aliases not registered with [`alias`](Self::alias).
    pub fn fallback(mut self, resolver: impl Resolve + 'static) -> Self {
        self.registry.set_fallback(resolver);
        self
    }

    /// Appends a bootstrapper. They run in the order added.
    pub fn bootstrapper(mut self, step: impl Bootstrapper) -> Self {
        self.bootstrappers.push(Box::new(step));
        self
    }

    pub fn exception_handler(mut self, handler: ExceptionHandler) -> Self {
        self.exceptions = handler;
        self
    }

    /// Resolves the stack. A stage naming an unknown alias or group fails
    /// here, before any request is served.
    pub fn build(self) -> Result<Kernel, Error> {
        let stack = self.registry.resolve_stack(&self.stages)?;
        debug!(
            stages = ?stack.names(),
            bootstrappers = self.bootstrappers.len(),
            debug = self.exceptions.config().debug,
            "kernel built"
        );

        Ok(Kernel {
            inner: Arc::new(Inner {
                stack,
                router: self.router,
                exceptions: self.exceptions,
                bootstrap: Bootstrap { done: AtomicBool::new(false), steps: self.bootstrappers },
                sequence: AtomicU64::new(0),
            }),
        })
    }
}
