//! Turning faults into responses.
//!
//! [`ExceptionHandler::render`] always produces a response. The decision
//! runs in a fixed order:
//!
//! 1. look through one [`Fault::Wrapped`] layer, or apply registered mappers
//! 2. let a [`CustomFault`](crate::CustomFault) render itself
//! 3. normalize "record not found" into a 404 [`HttpFault`]
//! 4. answer validation faults with JSON errors or a redirect back
//! 5. answer everything else with JSON or a rendered page

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::{HeaderMap, StatusCode};
use serde_json::{Map, Value, json};

use crate::config::KernelConfig;
use crate::fault::{Fault, GenericFault, HttpFault, ValidationFault};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

mod page;
mod report;

pub use report::TracingReporter;

/// Out-of-band sink for faults. Must not fail.
pub trait Reporter: Send + Sync {
    fn report(&self, fault: &Fault);
}

/// Template lookup for error pages.
pub trait ViewLookup: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn render(&self, name: &str, data: &Value) -> Result<String, Fault>;
}

/// Session storage for data that should survive one redirect.
pub trait SessionStore: Send + Sync {
    fn flash(&self, key: &str, value: Value);
}

type FaultMapper = Box<dyn Fn(&Fault) -> Option<Fault> + Send + Sync>;
type Negotiate = Box<dyn Fn(&Request) -> bool + Send + Sync>;

/// Reports faults and renders them into responses.
pub struct ExceptionHandler {
    config: KernelConfig,
    reporter: Arc<dyn Reporter>,
    views: Option<Arc<dyn ViewLookup>>,
    session: Option<Arc<dyn SessionStore>>,
    mappers: Vec<FaultMapper>,
    negotiate: Negotiate,
}

impl Default for ExceptionHandler {
    fn default() -> Self {
        Self::new(KernelConfig::default())
    }
}

impl ExceptionHandler {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(TracingReporter),
            views: None,
            session: None,
            mappers: Vec::new(),
            negotiate: Box::new(Request::expects_json),
        }
    }

    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn with_views(mut self, views: impl ViewLookup + 'static) -> Self {
        self.views = Some(Arc::new(views));
        self
    }

    pub fn with_session(mut self, session: impl SessionStore + 'static) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    /// Replaces the "does this client want JSON" decision.
    pub fn negotiate_with(mut self, predicate: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.negotiate = Box::new(predicate);
        self
    }

    /// Registers a mapper. The first mapper returning `Some` replaces the
    /// fault before rendering.
    pub fn map_fault(mut self, mapper: impl Fn(&Fault) -> Option<Fault> + Send + Sync + 'static) -> Self {
        self.mappers.push(Box::new(mapper));
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn report(&self, fault: &Fault) {
        self.reporter.report(fault);
    }

    pub fn render(&self, req: &Request, fault: Fault) -> Response {
        let fault = self.map(fault);

        if let Fault::Custom(custom) = &fault {
            if let Some(reply) = custom.render(req) {
                return reply.into_response();
            }
            if let Some(response) = custom.respond(req) {
                return response;
            }
        }

        match prepare(fault) {
            Fault::Validation(validation) => self.validation_response(req, validation),
            other => self.fault_response(req, &other),
        }
    }

    fn map(&self, fault: Fault) -> Fault {
        if let Fault::Wrapped { inner, .. } = fault {
            return *inner;
        }
        self.mappers.iter().find_map(|mapper| mapper(&fault)).unwrap_or(fault)
    }

    fn should_return_json(&self, req: &Request) -> bool {
        (self.negotiate)(req)
    }

    // ── Validation ───────────────────────────────────────────────────────────

    fn validation_response(&self, req: &Request, mut fault: ValidationFault) -> Response {
        if let Some(response) = fault.take_response() {
            return response;
        }

        if self.should_return_json(req) {
            let body = json!({ "message": fault.text(), "errors": fault.errors() });
            return Response::builder().status(fault.status()).json_value(&body);
        }

        let target = fault.redirect_target().or_else(|| req.previous_url()).unwrap_or("/");
        let bag = req.input_str("_error_bag").unwrap_or_else(|| fault.bag().to_owned());

        let response = Response::redirect(target)
            .with_input(self.flashable_input(req))
            .with_errors(fault.errors().clone(), &bag);
        self.flash_to_session(&response);
        response
    }

    fn flashable_input(&self, req: &Request) -> Map<String, Value> {
        let mut input = req.input();
        for field in &self.config.dont_flash {
            input.remove(field);
        }
        input
    }

    fn flash_to_session(&self, response: &Response) {
        let (Some(session), Some(flash)) = (&self.session, response.flash()) else {
            return;
        };
        session.flash("_old_input", Value::Object(flash.input.clone()));
        session.flash("errors", json!(flash.errors));
    }

    // ── Everything else ──────────────────────────────────────────────────────

    fn fault_response(&self, req: &Request, fault: &Fault) -> Response {
        if self.should_return_json(req) {
            self.json_response(fault)
        } else {
            self.content_response(fault)
        }
    }

    fn json_response(&self, fault: &Fault) -> Response {
        let http = http_parts(fault);

        let body = if self.config.debug {
            let location = fault.location();
            json!({
                "message": fault.to_string(),
                "exception": fault.type_name(),
                "file": location.map(|l| l.file()),
                "line": location.map(|l| l.line()),
                "trace": fault.trace(),
            })
        } else {
            json!({ "message": public_message(fault, http.as_ref()) })
        };

        let (status, headers) = http.unwrap_or_else(server_error);
        Response::builder().status(status).headers(&headers).json_value(&body)
    }

    fn content_response(&self, fault: &Fault) -> Response {
        match http_parts(fault) {
            None if self.config.debug => self.page_response(fault, server_error()),
            http => {
                let message = public_message(fault, http.as_ref());
                self.view_response(fault, message, http.unwrap_or_else(server_error))
            }
        }
    }

    /// Tries `errors::{status}`, then `errors::{N}xx`, then the built-in page.
    fn view_response(&self, fault: &Fault, message: String, (status, headers): (StatusCode, HeaderMap)) -> Response {
        if let Some((views, view)) = self.error_view(status) {
            let data = json!({
                "errors": {},
                "exception": { "message": message, "status": status.as_u16() },
            });
            let rendered = panic::catch_unwind(AssertUnwindSafe(|| views.render(&view, &data)))
                .unwrap_or_else(|payload| Err(GenericFault::from_panic(&*payload).into()));
            match rendered {
                Ok(html) => return Response::builder().status(status).headers(&headers).html(html),
                Err(render_fault) => self.report(&render_fault),
            }
        }
        self.page_response(fault, (status, headers))
    }

    fn error_view(&self, status: StatusCode) -> Option<(&dyn ViewLookup, String)> {
        let views = self.views.as_deref()?;
        let code = status.as_u16();

        let exact = format!("errors::{code}");
        if views.exists(&exact) {
            return Some((views, exact));
        }
        let wildcard = format!("errors::{}xx", code / 100);
        views.exists(&wildcard).then_some((views, wildcard))
    }

    fn page_response(&self, fault: &Fault, (status, headers): (StatusCode, HeaderMap)) -> Response {
        Response::builder()
            .status(status)
            .headers(&headers)
            .html(page::render(fault, status, self.config.debug))
    }
}

/// Record-not-found faults become plain 404s. Nothing else changes.
fn prepare(fault: Fault) -> Fault {
    match fault {
        Fault::NotFound(missing) => {
            Fault::Http(HttpFault::not_found(missing.to_string()).with_previous(missing))
        }
        other => other,
    }
}

/// Status and headers for faults that carry HTTP meaning.
fn http_parts(fault: &Fault) -> Option<(StatusCode, HeaderMap)> {
    match fault {
        Fault::Http(http) => Some((http.status(), http.headers().clone())),
        Fault::Custom(custom) => custom.status().map(|s| (s, HeaderMap::new())),
        _ => None,
    }
}

fn server_error() -> (StatusCode, HeaderMap) {
    (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new())
}

/// What a production client may read about the fault.
fn public_message(fault: &Fault, http: Option<&(StatusCode, HeaderMap)>) -> String {
    match http {
        Some((status, _)) => {
            let message = fault.to_string();
            if message.is_empty() {
                status.canonical_reason().unwrap_or("Error").to_owned()
            } else {
                message
            }
        }
        None => "Server Error".to_owned(),
    }
}
