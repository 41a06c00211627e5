//! Application faults.
//!
//! Anything a stage or a route handler can fail with is a [`Fault`]. The set
//! of variants is closed; types that need to shape their own response go
//! through [`CustomFault`], whose hooks the exception handler consults before
//! anything else.
//!
//! Faults never reach the wire as errors. The kernel turns every one of them
//! into a [`Response`](crate::Response).

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;

use http::{HeaderMap, StatusCode};
use serde_json::Value;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// Validation messages keyed by field name.
pub type ErrorMessages = BTreeMap<String, Vec<String>>;

// ── Fault ─────────────────────────────────────────────────────────────────────

/// A failure raised while handling a request.
#[derive(Debug, thiserror::Error)]
pub enum Fault {
    /// Carries an HTTP status and headers of its own.
    #[error(transparent)]
    Http(#[from] HttpFault),

    /// Input did not pass validation.
    #[error(transparent)]
    Validation(#[from] ValidationFault),

    /// A lookup came back empty. Rendered as a 404.
    #[error(transparent)]
    NotFound(#[from] RecordNotFound),

    /// Anything else.
    #[error(transparent)]
    Generic(#[from] GenericFault),

    /// Infrastructure wrapping around the fault that actually matters.
    /// The exception handler looks through exactly one of these.
    #[error("{context}")]
    Wrapped {
        context: String,
        #[source]
        inner: Box<Fault>,
    },

    /// A fault type that may render itself.
    #[error("{0}")]
    Custom(Box<dyn CustomFault>),
}

impl Fault {
    /// A generic fault with `message`, located at the caller.
    #[track_caller]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Generic(GenericFault::new(message))
    }

    /// Wraps `inner` with infrastructure context.
    pub fn wrap(context: impl Into<String>, inner: impl Into<Fault>) -> Self {
        Self::Wrapped { context: context.into(), inner: Box::new(inner.into()) }
    }

    pub fn custom(fault: impl CustomFault) -> Self {
        Self::Custom(Box::new(fault))
    }

    /// The HTTP status this fault asks for, when it asks for one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(f) => Some(f.status()),
            Self::Validation(f) => Some(f.status()),
            Self::NotFound(_) => Some(StatusCode::NOT_FOUND),
            Self::Custom(c) => c.status(),
            Self::Generic(_) | Self::Wrapped { .. } => None,
        }
    }

    /// The fault inside one [`Fault::Wrapped`] layer, or `self`.
    pub fn unwrapped(&self) -> &Fault {
        match self {
            Self::Wrapped { inner, .. } => inner,
            other => other,
        }
    }

    /// Type name shown in debug output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Http(_) => "keel::HttpFault",
            Self::Validation(_) => "keel::ValidationFault",
            Self::NotFound(_) => "keel::RecordNotFound",
            Self::Generic(f) => f.type_name(),
            Self::Wrapped { .. } => "keel::Fault::Wrapped",
            Self::Custom(c) => c.type_name(),
        }
    }

    /// Where the fault was raised, when that was recorded.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match self {
            Self::Http(f) => Some(f.location),
            Self::Validation(f) => Some(f.location),
            Self::Generic(f) => f.location,
            Self::NotFound(_) | Self::Wrapped { .. } | Self::Custom(_) => None,
        }
    }

    /// Captured stack frames, one line each. Empty unless backtraces are
    /// enabled (`RUST_BACKTRACE`) and the fault is generic.
    pub fn trace(&self) -> Vec<String> {
        match self {
            Self::Generic(f) => f.trace(),
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for Fault {
    #[track_caller]
    fn from(e: std::io::Error) -> Self {
        Self::Generic(GenericFault::from_error(e))
    }
}

impl From<serde_json::Error> for Fault {
    #[track_caller]
    fn from(e: serde_json::Error) -> Self {
        Self::Generic(GenericFault::from_error(e))
    }
}

// ── HttpFault ─────────────────────────────────────────────────────────────────

/// A fault that knows which HTTP status it deserves.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpFault {
    status: StatusCode,
    message: String,
    headers: HeaderMap,
    location: &'static Location<'static>,
    #[source]
    previous: Option<Box<Fault>>,
}

impl HttpFault {
    #[track_caller]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
            location: Location::caller(),
            previous: None,
        }
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Headers sent along with whatever response this fault becomes.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Records the fault this one replaced.
    pub fn with_previous(mut self, previous: impl Into<Fault>) -> Self {
        self.previous = Some(Box::new(previous.into()));
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn previous(&self) -> Option<&Fault> { self.previous.as_deref() }
}

// ── ValidationFault ───────────────────────────────────────────────────────────

/// Input failed validation.
///
/// Rendered as `{message, errors}` for JSON clients and as a redirect back
/// with flashed input and errors for everyone else, unless a response was
/// attached up front.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ValidationFault {
    errors: ErrorMessages,
    message: String,
    status: StatusCode,
    redirect_to: Option<String>,
    error_bag: String,
    response: Option<Response>,
    location: &'static Location<'static>,
}

impl ValidationFault {
    #[track_caller]
    pub fn new(errors: ErrorMessages) -> Self {
        Self {
            message: summarize(&errors),
            errors,
            status: StatusCode::UNPROCESSABLE_ENTITY,
            redirect_to: None,
            error_bag: "default".to_owned(),
            response: None,
            location: Location::caller(),
        }
    }

    /// One failed rule on one field.
    #[track_caller]
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ErrorMessages::new();
        errors.insert(field.to_owned(), vec![message.into()]);
        Self::new(errors)
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn status_code(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn redirect_to(mut self, url: impl Into<String>) -> Self {
        self.redirect_to = Some(url.into());
        self
    }

    pub fn error_bag(mut self, bag: impl Into<String>) -> Self {
        self.error_bag = bag.into();
        self
    }

    /// Use `response` as-is instead of building one from the errors.
    pub fn with_response(mut self, response: Response) -> Self {
        self.response = Some(response);
        self
    }

    pub fn errors(&self) -> &ErrorMessages { &self.errors }
    pub fn status(&self) -> StatusCode { self.status }
    pub fn redirect_target(&self) -> Option<&str> { self.redirect_to.as_deref() }
    pub fn bag(&self) -> &str { &self.error_bag }
    pub fn text(&self) -> &str { &self.message }

    pub(crate) fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }
}

/// First message, plus how many more there are.
fn summarize(errors: &ErrorMessages) -> String {
    let mut messages = errors.values().flatten();
    let Some(first) = messages.next() else {
        return "The given data was invalid.".to_owned();
    };

    match messages.count() {
        0 => first.clone(),
        1 => format!("{first} (and 1 more error)"),
        n => format!("{first} (and {n} more errors)"),
    }
}

// ── RecordNotFound ────────────────────────────────────────────────────────────

/// A lookup that found nothing. Both kinds render as `404 Not Found`.
#[derive(Debug, thiserror::Error)]
pub enum RecordNotFound {
    #[error("No query results for model [{model}]{}", ids_suffix(.ids))]
    Model { model: String, ids: Vec<String> },

    #[error("Case [{case}] not found on enum [{enum_name}].")]
    EnumCase { enum_name: String, case: String },
}

fn ids_suffix(ids: &[String]) -> String {
    if ids.is_empty() {
        String::new()
    } else {
        format!(" {}", ids.join(", "))
    }
}

// ── GenericFault ──────────────────────────────────────────────────────────────

/// A fault with no HTTP meaning of its own. Rendered as a 500.
pub struct GenericFault {
    type_name: &'static str,
    message: String,
    location: Option<&'static Location<'static>>,
    backtrace: Backtrace,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl GenericFault {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            type_name: "keel::GenericFault",
            message: message.into(),
            location: Some(Location::caller()),
            backtrace: Backtrace::capture(),
            source: None,
        }
    }

    /// Wraps any error, keeping its type name for debug output.
    #[track_caller]
    pub fn from_error<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            type_name: std::any::type_name::<E>(),
            message: error.to_string(),
            location: Some(Location::caller()),
            backtrace: Backtrace::capture(),
            source: Some(Box::new(error)),
        }
    }

    /// Builds a fault from a caught panic payload. The panic site is not
    /// known here, so no location is recorded.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_owned()
        };

        Self { type_name: "panic", location: None, ..Self::new(message) }
    }

    pub fn type_name(&self) -> &'static str { self.type_name }
    pub fn text(&self) -> &str { &self.message }

    fn trace(&self) -> Vec<String> {
        if self.backtrace.status() != BacktraceStatus::Captured {
            return Vec::new();
        }
        self.backtrace.to_string().lines().map(|l| l.trim().to_owned()).collect()
    }
}

impl fmt::Debug for GenericFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericFault")
            .field("type_name", &self.type_name)
            .field("message", &self.message)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for GenericFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for GenericFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ── CustomFault ───────────────────────────────────────────────────────────────

/// A fault type that can take over its own rendering.
///
/// Every hook is optional. The exception handler tries [`render`](Self::render)
/// first, then [`respond`](Self::respond), then falls back to the generic
/// treatment, using [`status`](Self::status) when present.
///
/// ```rust
/// use std::fmt;
/// use keel::{CustomFault, Fault, Reply, Request};
/// use http::StatusCode;
///
/// #[derive(Debug)]
/// struct Maintenance;
///
/// impl fmt::Display for Maintenance {
///     fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
///         f.write_str("down for maintenance")
///     }
/// }
///
/// impl CustomFault for Maintenance {
///     fn render(&self, _req: &Request) -> Option<Reply> {
///         Some(Reply::Status(StatusCode::SERVICE_UNAVAILABLE))
///     }
/// }
///
/// let fault = Fault::custom(Maintenance);
/// ```
pub trait CustomFault: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Render hook. `Some` wins over every other rule.
    fn render(&self, _req: &Request) -> Option<Reply> {
        None
    }

    /// Direct conversion into a response.
    fn respond(&self, _req: &Request) -> Option<Response> {
        None
    }

    /// Treat this fault as an HTTP fault with the given status.
    fn status(&self) -> Option<StatusCode> {
        None
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// What a render hook may hand back.
#[derive(Debug)]
pub enum Reply {
    Response(Response),
    Text(String),
    Json(Value),
    Status(StatusCode),
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        match self {
            Self::Response(r) => r,
            Self::Text(s) => Response::text(s),
            Self::Json(v) => Response::json_value(&v),
            Self::Status(s) => Response::status(s),
        }
    }
}

impl From<Response> for Reply {
    fn from(r: Response) -> Self { Self::Response(r) }
}
