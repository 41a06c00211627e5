//! Route handlers and what they return.
//!
//! A handler is any `async fn(Request) -> R` where `R` converts into an
//! [`Outcome`]: a plain response type, or `Result<T, E>` with `T` a response
//! and `E` convertible into a [`Fault`].
//!
//! The router keeps handlers of many concrete types in one table, so each is
//! erased into a shared [`BoxedEndpoint`] when registered:
//!
//! ```text
//! async fn show(req: Request) -> Result<Response, Fault>
//!        ↓ router.get("/users/{id}", show)
//! show.into_endpoint()            Arc<FnEndpoint<show>> as Arc<dyn Endpoint>
//!        ↓ per request
//! endpoint.call(req)              BoxFuture<Outcome>
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;
use serde_json::Value;

use crate::fault::{Fault, Reply};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What every stage, handler and router produces: a response or a fault.
pub type Outcome = Result<Response, Fault>;

/// Boxed `Send` future, by default resolving to an [`Outcome`].
pub type BoxFuture<T = Outcome> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Conversion of a handler's return value into an [`Outcome`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoResponse,
    E: Into<Fault>,
{
    fn into_outcome(self) -> Outcome {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

macro_rules! infallible_outcome {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> Outcome { Ok(self.into_response()) }
            }
        )*
    };
}

infallible_outcome!(Response, &'static str, String, StatusCode, Value, Reply);

// ── Erased endpoints ──────────────────────────────────────────────────────────

/// A handler with its concrete type erased.
///
/// Public only because it appears in [`Handler`]'s signature.
#[doc(hidden)]
pub trait Endpoint: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedEndpoint = Arc<dyn Endpoint>;

struct FnEndpoint<F>(F);

impl<F, Fut, R> Endpoint for FnEndpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Implemented for every valid route handler:
///
/// ```text
/// async fn name(req: Request) -> impl IntoOutcome
/// ```
///
/// Sealed. The blanket impl is the only one.
pub trait Handler: sealed::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_endpoint(self) -> BoxedEndpoint;
}

mod sealed {
    pub trait Sealed {}
}

impl<F, Fut, R> sealed::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_endpoint(self) -> BoxedEndpoint {
        Arc::new(FnEndpoint(self))
    }
}
