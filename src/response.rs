//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Handlers build a [`Response`]; the exception handler builds one from a
//! fault. Either way the server adapter writes it to the wire.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Extensions, StatusCode};
use http_body_util::Full;
use serde_json::{Map, Value};

use crate::fault::ErrorMessages;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Flavor ────────────────────────────────────────────────────────────────────

/// The two kinds of response the kernel produces. Both carry status, headers
/// and body; the flavor only records how the body was meant to be read.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flavor {
    /// A JSON document.
    Structured,
    /// Text, HTML, a redirect, or opaque bytes.
    Content,
}

// ── Flash ─────────────────────────────────────────────────────────────────────

/// Data a redirect asks the session to keep for exactly one more request.
///
/// Attached to redirect responses as an extension. The exception handler
/// hands it to the configured [`SessionStore`](crate::SessionStore), if any.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flash {
    /// Previous input, so forms can be refilled.
    pub input: Map<String, Value>,
    /// Validation errors keyed by error bag name.
    pub errors: BTreeMap<String, ErrorMessages>,
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use keel::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use keel::{ContentType, Response};
/// use http::{StatusCode, header::{HeaderValue, LOCATION}};
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header(LOCATION, HeaderValue::from_static("/users/42"))
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    flavor: Flavor,
    extensions: Extensions,
}

impl Response {
    /// `200 OK`, `application/json`, body passed through untouched.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `application/json` from a JSON value.
    pub fn json_value(value: &Value) -> Self {
        Self::builder().json_value(value)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// `200 OK`, `text/html; charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::builder().html(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// `302 Found` pointing at `to`.
    pub fn redirect(to: &str) -> Self {
        let mut response = Self::status(StatusCode::FOUND);
        match HeaderValue::try_from(to) {
            Ok(location) => {
                response.headers.insert(header::LOCATION, location);
            }
            Err(_) => {
                tracing::warn!(target_url = to, "redirect target is not a valid header value");
                response.headers.insert(header::LOCATION, HeaderValue::from_static("/"));
            }
        }
        response
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn flavor(&self) -> Flavor { self.flavor }
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    pub fn set_status(&mut self, code: StatusCode) {
        self.status = code;
    }

    /// Body decoded as JSON.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Flash the given input to the session along with this response.
    pub fn with_input(self, input: Map<String, Value>) -> Self {
        self.update_flash(|flash| flash.input.extend(input))
    }

    /// Flash validation errors into the named error bag.
    pub fn with_errors(self, errors: ErrorMessages, bag: &str) -> Self {
        self.update_flash(|flash| {
            flash.errors.insert(bag.to_owned(), errors);
        })
    }

    /// Data flashed by [`with_input`](Self::with_input) / [`with_errors`](Self::with_errors).
    pub fn flash(&self) -> Option<&Flash> {
        self.extensions.get::<Flash>()
    }

    fn update_flash(mut self, update: impl FnOnce(&mut Flash)) -> Self {
        let mut flash = self.extensions.remove::<Flash>().unwrap_or_default();
        update(&mut flash);
        self.extensions.insert(flash);
        self
    }

    /// Converts into the `http` response hyper writes to the wire.
    pub(crate) fn into_inner(self) -> http::Response<Full<Bytes>> {
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Adds every header in `headers`, keeping ones already set.
    pub fn headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, Flavor::Structured, body.into())
    }

    /// Terminate with a pretty-printed JSON value.
    pub fn json_value(self, value: &Value) -> Response {
        self.json(format!("{value:#}"))
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Flavor::Content, Bytes::from(body.into()))
    }

    /// Terminate with an HTML body (`text/html; charset=utf-8`).
    pub fn html(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Html, Flavor::Content, Bytes::from(body.into()))
    }

    /// Terminate with a typed body. Use this for XML, CSV, binary, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        let flavor = match content_type {
            ContentType::Json => Flavor::Structured,
            _ => Flavor::Content,
        };
        self.finish(content_type, flavor, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: Bytes::new(),
            flavor: Flavor::Content,
            extensions: Extensions::new(),
        }
    }

    fn finish(mut self, content_type: ContentType, flavor: Flavor, body: Bytes) -> Response {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        }
        Response { status: self.status, headers: self.headers, body, flavor, extensions: Extensions::new() }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
///
/// # Example: typed `Json<T>` wrapper with serde
///
/// ```rust,ignore
/// use keel::{IntoResponse, Response};
/// use http::StatusCode;
/// use serde::Serialize;
///
/// struct Json<T: Serialize>(T);
///
/// impl<T: Serialize> IntoResponse for Json<T> {
///     fn into_response(self) -> Response {
///         match serde_json::to_vec(&self.0) {
///             Ok(bytes) => Response::json(bytes),
///             Err(_)    => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
///         }
///     }
/// }
/// ```
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for Value {
    fn into_response(self) -> Response { Response::json_value(&self) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}
