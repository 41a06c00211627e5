//! Running a request through a resolved stack.

use std::sync::Arc;

use super::stack::Stack;
use crate::handler::BoxFuture;
use crate::request::Request;

type Destination = Arc<dyn Fn(Request) -> BoxFuture + Send + Sync>;

/// Per-request view of the stack plus where it ends.
struct Chain {
    stack: Stack,
    destination: Destination,
}

/// The rest of the chain, as seen from inside one stage.
///
/// Consumed by [`run`](Next::run), so a stage can pass control inward at
/// most once.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Passes `req` to the next stage, or to the destination after the last.
    pub fn run(self, req: Request) -> BoxFuture {
        match self.chain.stack.get(self.index) {
            Some(stage) => {
                let next = Next { chain: Arc::clone(&self.chain), index: self.index + 1 };
                stage.middleware().handle(req, next)
            }
            None => (self.chain.destination)(req),
        }
    }
}

/// Sends requests through a fixed stack of stages.
///
/// ```rust
/// # use keel::{BoxFuture, Outcome, Request, Response, middleware::{Next, Pipeline, Registry, Stage}};
/// # async fn demo(req: Request) -> Result<(), keel::Error> {
/// async fn stamp(mut req: Request, next: Next) -> Outcome {
///     req.attributes_mut().insert("stamped");
///     next.run(req).await
/// }
///
/// let stack = Registry::new().resolve_stack(&[Stage::direct("stamp", stamp)])?;
/// let outcome = Pipeline::through(stack)
///     .send(req)
///     .then(|_req| -> BoxFuture { Box::pin(async move { Ok(Response::text("done")) }) })
///     .await;
/// # Ok(()) }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    stack: Stack,
}

impl Pipeline {
    pub fn through(stack: Stack) -> Self {
        Self { stack }
    }

    pub fn send(&self, request: Request) -> Sending {
        Sending { stack: self.stack.clone(), request }
    }
}

/// A request on its way through a [`Pipeline`].
pub struct Sending {
    stack: Stack,
    request: Request,
}

impl Sending {
    /// Runs the stages outermost first, ending in `destination`.
    pub fn then<D>(self, destination: D) -> BoxFuture
    where
        D: Fn(Request) -> BoxFuture + Send + Sync + 'static,
    {
        let chain = Arc::new(Chain { stack: self.stack, destination: Arc::new(destination) });
        Next { chain, index: 0 }.run(self.request)
    }
}
