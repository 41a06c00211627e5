//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Uri, header};
use serde_json::{Map, Value};

/// An incoming HTTP request.
///
/// Method, URI, headers and body are fixed once the request leaves the
/// server adapter. The attribute bag is the one mutable part: stages use it
/// to hand typed values to the stages (and the handler) behind them.
///
/// Cloning is cheap. The body is reference counted, so the kernel keeps a
/// copy around for rendering faults after the original has been consumed.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    params: HashMap<String, String>,
    attributes: Extensions,
}

impl Request {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        Self { method, uri, headers, body, params: HashMap::new(), attributes: Extensions::new() }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup. Values that are not visible ASCII are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    /// Typed attributes shared between stages.
    pub fn attributes(&self) -> &Extensions { &self.attributes }
    pub fn attributes_mut(&mut self) -> &mut Extensions { &mut self.attributes }

    // ── Content negotiation ──────────────────────────────────────────────────

    /// Whether the client would rather get JSON back than a rendered page.
    ///
    /// True for clients that ask for JSON outright, and for plain AJAX calls
    /// (not PJAX) that accept any content type.
    pub fn expects_json(&self) -> bool {
        (self.is_ajax() && !self.is_pjax() && self.accepts_any_content_type()) || self.wants_json()
    }

    /// The most preferred `Accept` type is a JSON media type.
    pub fn wants_json(&self) -> bool {
        self.acceptable_types()
            .first()
            .is_some_and(|t| t.contains("/json") || t.contains("+json"))
    }

    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with")
            .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
    }

    pub fn is_pjax(&self) -> bool {
        self.headers.contains_key("x-pjax")
    }

    pub fn accepts_any_content_type(&self) -> bool {
        let types = self.acceptable_types();
        types.is_empty() || matches!(types[0], "*/*" | "*")
    }

    /// `Accept` media types, most preferred first. Ties keep header order.
    /// Types with `q=0` are refused and left out.
    fn acceptable_types(&self) -> Vec<&str> {
        let Some(accept) = self.header(header::ACCEPT.as_str()) else {
            return Vec::new();
        };

        let mut weighted: Vec<(&str, f32)> = accept
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';').map(str::trim);
                let media = parts.next().filter(|m| !m.is_empty())?;
                let quality = parts
                    .find_map(|p| p.strip_prefix("q="))
                    .and_then(|q| q.parse::<f32>().ok())
                    .unwrap_or(1.0);
                (quality > 0.0).then_some((media, quality))
            })
            .collect();

        weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
        weighted.into_iter().map(|(media, _)| media).collect()
    }

    fn is_json_body(&self) -> bool {
        self.header(header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.contains("/json") || ct.contains("+json"))
    }

    fn is_form_body(&self) -> bool {
        self.header(header::CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    }

    // ── Input ────────────────────────────────────────────────────────────────

    /// Query string and body input merged into one map. Body keys win.
    ///
    /// Bodies are read as a JSON object or as a urlencoded form depending on
    /// `content-type`. Anything that does not decode contributes nothing.
    pub fn input(&self) -> Map<String, Value> {
        let mut input = Map::new();

        if let Some(query) = self.uri.query() {
            if let Ok(pairs) = serde_urlencoded::from_str::<Vec<(String, String)>>(query) {
                input.extend(pairs.into_iter().map(|(k, v)| (k, Value::String(v))));
            }
        }

        if self.is_json_body() {
            if let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(&self.body) {
                input.extend(body);
            }
        } else if self.is_form_body() {
            if let Ok(pairs) = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&self.body) {
                input.extend(pairs.into_iter().map(|(k, v)| (k, Value::String(v))));
            }
        }

        input
    }

    /// A single input value as a string, if present.
    pub fn input_str(&self, key: &str) -> Option<String> {
        match self.input().remove(key)? {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Where the client came from, per the `Referer` header.
    pub fn previous_url(&self) -> Option<&str> {
        self.header(header::REFERER.as_str())
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        let mut request = Self::new(parts.method, parts.uri, parts.headers, body);
        request.attributes = parts.extensions;
        request
    }
}
