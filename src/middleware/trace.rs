//! Per-request tracing span with method, path, status and latency.
//!
//! ```rust
//! use keel::{Kernel, Router, middleware::trace};
//!
//! let kernel = Kernel::builder(Router::new())
//!     .middleware(trace::stage())
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(kernel.stack().names(), [trace::NAME]);
//! ```

use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use super::{Middleware, Next, Stage};
use crate::handler::BoxFuture;
use crate::request::Request;

/// Stage name under which [`Trace`] registers itself.
pub const NAME: &str = "trace";

/// The tracing middleware as a ready-made stage.
pub fn stage() -> Stage {
    Stage::direct(NAME, Trace)
}

/// Opens an `http_request` span around everything inside it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn handle(&self, req: Request, next: Next) -> BoxFuture {
        let span = info_span!("http_request", method = %req.method(), path = %req.path());
        let started = Instant::now();

        Box::pin(
            async move {
                let outcome = next.run(req).await;
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                match &outcome {
                    Ok(response) => {
                        info!(status = response.status_code().as_u16(), elapsed_ms, "request completed");
                    }
                    Err(fault) => {
                        warn!(fault = %fault, elapsed_ms, "request faulted");
                    }
                }
                outcome
            }
            .instrument(span),
        )
    }
}
