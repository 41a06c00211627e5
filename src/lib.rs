//! # keel
//!
//! An HTTP kernel for Rust services: a middleware pipeline, one-time
//! bootstrap, and a fault-to-response mapper, served over hyper.
//!
//! ## The contract
//!
//! Every request that reaches [`Kernel::handle`] gets exactly one
//! [`Response`]. Stages and handlers fail with a [`Fault`]; the kernel
//! reports it and the [`ExceptionHandler`] decides what the client sees:
//!
//! - validation faults become `422 {message, errors}` for JSON clients and a
//!   redirect back with flashed input for everyone else
//! - "record not found" becomes a 404
//! - [`HttpFault`]s keep their status and headers
//! - anything else is a 500 that reveals nothing unless debug is on
//!
//! Panics in stages or handlers are contained the same way.
//!
//! What stays outside the kernel, behind narrow traits:
//!
//! - **Routing**: [`Dispatch`], with a radix-tree [`Router`] included
//! - **Middleware lookup**: [`Resolve`](middleware::Resolve)
//! - **Views**: [`ViewLookup`]
//! - **Sessions**: [`SessionStore`]
//! - **Reporting**: [`Reporter`], logging through `tracing` by default
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::{
//!     ExceptionHandler, Fault, Kernel, KernelConfig, Request, Response, Router, Server,
//!     ValidationFault, middleware::trace,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keel::Error> {
//!     let app = Router::new()
//!         .get("/users/{id}", get_user)
//!         .post("/users", create_user);
//!
//!     let kernel = Kernel::builder(app)
//!         .middleware(trace::stage())
//!         .exception_handler(ExceptionHandler::new(KernelConfig::from_env()))
//!         .build()?;
//!
//!     Server::bind("0.0.0.0:3000")?.serve(kernel).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, Fault> {
//!     let Some(name) = req.input_str("name") else {
//!         return Err(ValidationFault::field("name", "The name field is required.").into());
//!     };
//!     Ok(Response::json_value(&serde_json::json!({ "name": name })))
//! }
//! ```

mod config;
mod error;
mod exceptions;
mod fault;
mod handler;
mod kernel;
mod request;
mod response;
mod router;
mod server;

pub mod middleware;

pub use config::KernelConfig;
pub use error::Error;
pub use exceptions::{ExceptionHandler, Reporter, SessionStore, TracingReporter, ViewLookup};
pub use fault::{CustomFault, ErrorMessages, Fault, GenericFault, HttpFault, RecordNotFound, Reply, ValidationFault};
pub use handler::{BoxFuture, Handler, IntoOutcome, Outcome};
pub use kernel::{Bootstrapper, CurrentRequest, Kernel, KernelBuilder, bootstrapper};
pub use request::Request;
pub use response::{ContentType, Flash, Flavor, IntoResponse, Response, ResponseBuilder};
pub use router::{Dispatch, Router};
pub use server::Server;
