//! Middleware layer.
//!
//! Middleware intercepts requests on their way to the router and is the right
//! place for cross-cutting concerns: structured tracing, request ids,
//! authentication-header inspection.
//!
//! A middleware receives the request and a [`Next`] handle. It either calls
//! `next.run(req)` to pass control inward, or returns a response of its own
//! and the rest of the chain never runs:
//!
//! ```rust
//! use keel::{Request, Response, middleware::Next};
//! use http::StatusCode;
//!
//! async fn require_token(req: Request, next: Next) -> keel::Outcome {
//!     if req.header("authorization").is_none() {
//!         return Ok(Response::status(StatusCode::UNAUTHORIZED));
//!     }
//!     next.run(req).await
//! }
//! ```
//!
//! Stacks are declared as [`Stage`]s and flattened once, when the kernel is
//! built. See [`Registry`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, IntoOutcome};
use crate::request::Request;

mod pipeline;
mod stack;
pub mod trace;

pub use pipeline::{Next, Pipeline, Sending};
pub use stack::{Registry, Resolve, ResolvedStage, Stack};

/// One unit of the middleware pipeline.
pub trait Middleware: Send + Sync + 'static {
    fn handle(&self, req: Request, next: Next) -> BoxFuture;
}

/// Shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Any `async fn(Request, Next) -> impl IntoOutcome` is middleware.
impl<F, Fut, R> Middleware for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let fut = (self)(req, next);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

/// A stage as declared, before resolution.
#[derive(Clone)]
pub enum Stage {
    /// Middleware given inline. The name is used for priority ordering and logs.
    Direct { name: Arc<str>, middleware: BoxedMiddleware },
    /// Looked up by name in the registry (or its fallback resolver).
    Alias(String),
    /// Expanded into the group's members.
    Group(String),
}

impl Stage {
    pub fn direct(name: &str, middleware: impl Middleware) -> Self {
        Self::Direct { name: Arc::from(name), middleware: Arc::new(middleware) }
    }

    pub fn alias(name: impl Into<String>) -> Self {
        Self::Alias(name.into())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::Group(name.into())
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Direct { name, .. } => name,
            Self::Alias(name) | Self::Group(name) => name,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { name, .. } => f.debug_tuple("Direct").field(name).finish(),
            Self::Alias(name) => f.debug_tuple("Alias").field(name).finish(),
            Self::Group(name) => f.debug_tuple("Group").field(name).finish(),
        }
    }
}
