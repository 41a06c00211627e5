//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. The kernel only ever sees
//! the [`Dispatch`] trait, so any other routing scheme plugs in the same way.

use std::collections::HashMap;
use std::future;
use std::sync::Arc;

use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::fault::{Fault, HttpFault};
use crate::handler::{BoxFuture, BoxedEndpoint, Handler};
use crate::request::Request;

/// The final destination of the middleware pipeline.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, req: Request) -> BoxFuture;
}

/// The application router.
///
/// One radix tree per HTTP method. Build it once at startup and hand it to
/// [`Kernel::builder`](crate::Kernel::builder). Each registration returns
/// `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedEndpoint>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax. `req.param("name")` retrieves them:
    ///
    /// ```rust
    /// # use keel::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with an earlier route. Use
    /// [`try_on`](Self::try_on) to get the error instead.
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.try_on(method, path, handler)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`on`](Self::on), returning an error for invalid routes.
    pub fn try_on(mut self, method: Method, path: &str, handler: impl Handler) -> Result<Self, Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_endpoint())
            .map_err(|source| Error::Route { path: path.to_owned(), source })?;
        Ok(self)
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn patch(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<(BoxedEndpoint, HashMap<String, String>), Fault> {
        if let Some(matched) = self.routes.get(method).and_then(|tree| tree.at(path).ok()) {
            let handler = Arc::clone(matched.value);
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Ok((handler, params));
        }

        let mut allowed: Vec<&str> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(m, _)| m.as_str())
            .collect();

        if allowed.is_empty() {
            return Err(HttpFault::not_found(format!("The route {path} could not be found.")).into());
        }

        allowed.sort_unstable();
        let mut headers = HeaderMap::new();
        if let Ok(allow) = HeaderValue::try_from(allowed.join(", ")) {
            headers.insert(header::ALLOW, allow);
        }
        Err(HttpFault::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("The {method} method is not supported for route {path}. Supported methods: {}.", allowed.join(", ")),
        )
        .with_headers(headers)
        .into())
    }
}

impl Dispatch for Router {
    fn dispatch(&self, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Ok((handler, params)) => {
                req.set_params(params);
                handler.call(req)
            }
            Err(fault) => Box::pin(future::ready(Err(fault))),
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
