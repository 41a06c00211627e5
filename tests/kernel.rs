use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use keel::middleware::{Next, Stage};
use keel::{
    CustomFault, ExceptionHandler, Fault, Flavor, HttpFault, Kernel, KernelConfig, Outcome,
    RecordNotFound, Reporter, Request, Response, Router, SessionStore, ValidationFault, ViewLookup,
};
use serde_json::{Value, json};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
    let mut builder = http::Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Bytes::from(body.to_owned())).unwrap().into()
}

fn json_get(uri: &str) -> Request {
    request(Method::GET, uri, &[("accept", "application/json")], "")
}

fn html_get(uri: &str) -> Request {
    request(Method::GET, uri, &[("accept", "text/html")], "")
}

#[derive(Clone, Default)]
struct Reports(Arc<Mutex<Vec<String>>>);

impl Reports {
    fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl Reporter for Reports {
    fn report(&self, fault: &Fault) {
        self.0.lock().unwrap().push(fault.to_string());
    }
}

#[derive(Clone, Default)]
struct Session(Arc<Mutex<Vec<(String, Value)>>>);

impl SessionStore for Session {
    fn flash(&self, key: &str, value: Value) {
        self.0.lock().unwrap().push((key.to_owned(), value));
    }
}

#[derive(Clone)]
struct Views {
    known: Arc<HashSet<&'static str>>,
    rendered: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Views {
    fn with(names: &[&'static str]) -> Self {
        Self {
            known: Arc::new(names.iter().copied().collect()),
            rendered: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ViewLookup for Views {
    fn exists(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    fn render(&self, name: &str, data: &Value) -> Result<String, Fault> {
        self.rendered.lock().unwrap().push((name.to_owned(), data.clone()));
        Ok(format!("<h1>{}</h1>", data["exception"]["message"].as_str().unwrap_or("")))
    }
}

async fn register(req: Request) -> Result<Response, Fault> {
    let input = req.input();
    match input.get("email").and_then(Value::as_str) {
        Some(email) if !email.is_empty() => Ok(Response::status(StatusCode::CREATED)),
        _ => Err(ValidationFault::field("email", "The email field is required.").into()),
    }
}

async fn maintenance(_req: Request) -> Result<Response, Fault> {
    let mut headers = HeaderMap::new();
    headers.insert(header::RETRY_AFTER, HeaderValue::from_static("60"));
    Err(HttpFault::new(StatusCode::SERVICE_UNAVAILABLE, "Back soon").with_headers(headers).into())
}

async fn missing_user(_req: Request) -> Result<Response, Fault> {
    Err(RecordNotFound::Model { model: "User".into(), ids: vec!["7".into()] }.into())
}

async fn unknown_case(_req: Request) -> Result<Response, Fault> {
    Err(RecordNotFound::EnumCase { enum_name: "Role".into(), case: "wizard".into() }.into())
}

async fn explode(_req: Request) -> Response {
    panic!("the handler fell over")
}

async fn secret(_req: Request) -> Result<Response, Fault> {
    Err(Fault::msg("connection string: postgres://admin:hunter2@db"))
}

fn app() -> Router {
    Router::new()
        .post("/register", register)
        .get("/maintenance", maintenance)
        .get("/users/7", missing_user)
        .get("/roles/wizard", unknown_case)
        .get("/explode", explode)
        .get("/secret", secret)
}

fn kernel(handler: ExceptionHandler) -> Kernel {
    Kernel::builder(app()).exception_handler(handler).build().unwrap()
}

// ── Validation ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn validation_failure_for_json_client_is_structured_422() {
    let kernel = kernel(ExceptionHandler::default());
    let req = request(
        Method::POST,
        "/register",
        &[("accept", "application/json"), ("content-type", "application/json")],
        r#"{"email":""}"#,
    );

    let response = kernel.handle(req).await;

    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.flavor(), Flavor::Structured);
    let body = response.json_body().unwrap();
    assert_eq!(body["message"], "The email field is required.");
    assert_eq!(body["errors"]["email"], json!(["The email field is required."]));
}

#[tokio::test]
async fn validation_failure_for_form_redirects_back_without_passwords() {
    let session = Session::default();
    let kernel = kernel(ExceptionHandler::default().with_session(session.clone()));
    let req = request(
        Method::POST,
        "/register",
        &[
            ("accept", "text/html"),
            ("content-type", "application/x-www-form-urlencoded"),
            ("referer", "http://app.test/register"),
        ],
        "email=&name=alice&password=s3cret&password_confirmation=s3cret&current_password=old",
    );

    let response = kernel.handle(req).await;

    assert_eq!(response.status_code(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "http://app.test/register");

    let flash = response.flash().unwrap();
    assert_eq!(flash.input["name"], "alice");
    for redacted in ["password", "password_confirmation", "current_password"] {
        assert!(!flash.input.contains_key(redacted), "{redacted} was flashed");
    }
    assert!(flash.errors["default"].contains_key("email"));

    let flashed = session.0.lock().unwrap();
    assert!(flashed.iter().any(|(key, value)| key == "_old_input" && value["name"] == "alice"));
    assert!(flashed.iter().any(|(key, value)| key == "errors" && value["default"]["email"].is_array()));
}

#[tokio::test]
async fn error_bag_can_be_chosen_by_the_form() {
    let kernel = kernel(ExceptionHandler::default());
    let req = request(
        Method::POST,
        "/register",
        &[("content-type", "application/x-www-form-urlencoded")],
        "email=&_error_bag=signup",
    );

    let response = kernel.handle(req).await;

    let flash = response.flash().unwrap();
    assert!(flash.errors.contains_key("signup"));
    assert!(!flash.errors.contains_key("default"));
}

#[tokio::test]
async fn ajax_request_accepting_anything_gets_json() {
    let kernel = kernel(ExceptionHandler::default());
    let req = request(
        Method::POST,
        "/register",
        &[("x-requested-with", "XMLHttpRequest"), ("content-type", "application/json")],
        "{}",
    );

    let response = kernel.handle(req).await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.flavor(), Flavor::Structured);
}

// ── HTTP faults and views ─────────────────────────────────────────────────────

#[tokio::test]
async fn http_fault_without_debug_falls_back_to_wildcard_view() {
    let views = Views::with(&["errors::5xx"]);
    let kernel = kernel(ExceptionHandler::default().with_views(views.clone()));

    let response = kernel.handle(html_get("/maintenance")).await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    assert_eq!(response.body(), b"<h1>Back soon</h1>");

    let rendered = views.rendered.lock().unwrap();
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].0, "errors::5xx");
    assert_eq!(rendered[0].1, json!({ "errors": {}, "exception": { "message": "Back soon", "status": 503 } }));
    assert!(!String::from_utf8_lossy(response.body()).contains("trace"));
}

#[tokio::test]
async fn record_not_found_renders_as_404() {
    let kernel = kernel(ExceptionHandler::default());

    for uri in ["/users/7", "/roles/wizard"] {
        let response = kernel.handle(json_get(uri)).await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND, "{uri}");
    }

    let body = kernel.handle(json_get("/users/7")).await.json_body().unwrap();
    assert_eq!(body["message"], "No query results for model [User] 7");
}

#[tokio::test]
async fn unknown_route_is_404_and_wrong_method_is_405() {
    let kernel = kernel(ExceptionHandler::default());

    let missing = kernel.handle(json_get("/nowhere")).await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    let wrong = kernel.handle(request(Method::DELETE, "/register", &[("accept", "application/json")], "")).await;
    assert_eq!(wrong.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(wrong.headers()[header::ALLOW], "POST");
}

// ── Generic faults ────────────────────────────────────────────────────────────

#[tokio::test]
async fn generic_fault_reveals_nothing_in_production() {
    let reports = Reports::default();
    let kernel = kernel(ExceptionHandler::default().with_reporter(reports.clone()));

    let json = kernel.handle(json_get("/secret")).await;
    assert_eq!(json.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json.json_body().unwrap(), json!({ "message": "Server Error" }));

    let html = kernel.handle(html_get("/secret")).await;
    let page = String::from_utf8_lossy(html.body()).into_owned();
    assert!(page.contains("500 | Server Error"));
    assert!(!page.contains("hunter2"));

    assert_eq!(reports.messages().len(), 2);
}

#[tokio::test]
async fn debug_mode_json_carries_exception_details() {
    let kernel = kernel(ExceptionHandler::new(KernelConfig::default().with_debug(true)));

    let body = kernel.handle(json_get("/secret")).await.json_body().unwrap();

    assert_eq!(body["message"], "connection string: postgres://admin:hunter2@db");
    assert_eq!(body["exception"], "keel::GenericFault");
    assert_eq!(body["file"], file!());
    assert!(body["line"].as_u64().unwrap() > 0);
    assert!(body["trace"].is_array());
}

#[tokio::test]
async fn panicking_handler_yields_500_and_is_reported() {
    let reports = Reports::default();
    let kernel = kernel(ExceptionHandler::default().with_reporter(reports.clone()));

    let response = kernel.handle(json_get("/explode")).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reports.messages(), ["the handler fell over"]);

    // Still serving.
    let after = kernel.handle(json_get("/users/7")).await;
    assert_eq!(after.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn panicking_stage_yields_500() {
    async fn broken(_req: Request, _next: Next) -> Response {
        panic!("stage fell over")
    }

    let kernel = Kernel::builder(app()).middleware(Stage::direct("broken", broken)).build().unwrap();

    let response = kernel.handle(json_get("/users/7")).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

struct FaultyReporter;

impl Reporter for FaultyReporter {
    fn report(&self, _fault: &Fault) {
        panic!("log sink unavailable")
    }
}

#[tokio::test]
async fn panicking_reporter_does_not_stop_rendering() {
    let kernel = Kernel::builder(app())
        .middleware(Stage::direct("gone", |_req: Request, _next: Next| async {
            Err::<Response, _>(Fault::from(HttpFault::not_found("no such page")))
        }))
        .exception_handler(ExceptionHandler::default().with_reporter(FaultyReporter))
        .build()
        .unwrap();

    let response = kernel.handle(json_get("/anything")).await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.flavor(), Flavor::Structured);
    assert_eq!(response.json_body().unwrap()["message"], "no such page");
}

#[derive(Debug)]
struct Locked;

impl fmt::Display for Locked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("resource locked")
    }
}

impl CustomFault for Locked {
    fn respond(&self, _req: &Request) -> Option<Response> {
        panic!("responder crashed")
    }

    fn status(&self) -> Option<StatusCode> {
        Some(StatusCode::LOCKED)
    }
}

#[tokio::test]
async fn panic_while_rendering_keeps_the_fault_status() {
    let kernel = Kernel::builder(app())
        .middleware(Stage::direct("locked", |_req: Request, _next: Next| async {
            Err::<Response, _>(Fault::wrap("while loading document", Fault::custom(Locked)))
        }))
        .build()
        .unwrap();

    let response = kernel.handle(json_get("/doc")).await;

    assert_eq!(response.status_code(), StatusCode::LOCKED);
    assert_eq!(response.body(), b"Locked");
}

// ── Unwrapping and hooks ──────────────────────────────────────────────────────

#[tokio::test]
async fn wrapped_fault_is_unwrapped_one_hop() {
    let wraps_once = |_req: Request, _next: Next| async {
        Err::<Response, _>(Fault::wrap("while rendering view", HttpFault::new(StatusCode::GONE, "gone")))
    };
    let wraps_twice = |_req: Request, _next: Next| async {
        Err::<Response, _>(Fault::wrap("outer", Fault::wrap("inner", HttpFault::new(StatusCode::GONE, "gone"))))
    };

    let once = Kernel::builder(app()).middleware(Stage::direct("once", wraps_once)).build().unwrap();
    assert_eq!(once.handle(json_get("/")).await.status_code(), StatusCode::GONE);

    let twice = Kernel::builder(app()).middleware(Stage::direct("twice", wraps_twice)).build().unwrap();
    assert_eq!(twice.handle(json_get("/")).await.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[derive(Debug)]
struct PaymentRequired;

impl fmt::Display for PaymentRequired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("upgrade your plan")
    }
}

impl CustomFault for PaymentRequired {
    fn respond(&self, req: &Request) -> Option<Response> {
        let body = json!({ "upgrade": format!("https://billing.test{}", req.path()) });
        Some(Response::builder().status(StatusCode::PAYMENT_REQUIRED).json_value(&body))
    }
}

#[tokio::test]
async fn custom_fault_renders_itself() {
    let paywall = |_req: Request, _next: Next| async { Err::<Response, _>(Fault::custom(PaymentRequired)) };
    let kernel = Kernel::builder(app()).middleware(Stage::direct("paywall", paywall)).build().unwrap();

    let response = kernel.handle(html_get("/reports")).await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    assert_eq!(response.json_body().unwrap()["upgrade"], "https://billing.test/reports");
}

#[tokio::test]
async fn short_circuiting_stage_answers_without_the_router() {
    let routed = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&routed);
    let router = Router::new().get("/", move |_req: Request| {
        *flag.lock().unwrap() = true;
        async { Response::text("routed") }
    });

    let gate = |_req: Request, _next: Next| async { Response::status(StatusCode::UNAUTHORIZED) };
    let kernel = Kernel::builder(router).middleware(Stage::direct("gate", gate)).build().unwrap();

    let response = kernel.handle(json_get("/")).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert!(!*routed.lock().unwrap());
}

#[tokio::test]
async fn stage_changes_reach_the_router() {
    #[derive(Clone)]
    struct Tenant(&'static str);

    async fn tenant(mut req: Request, next: Next) -> Outcome {
        req.attributes_mut().insert(Tenant("acme"));
        next.run(req).await
    }

    async fn whoami(req: Request) -> Response {
        Response::text(req.attributes().get::<Tenant>().map_or("none", |t| t.0))
    }

    let kernel = Kernel::builder(Router::new().get("/", whoami))
        .alias("tenant", tenant)
        .middleware(Stage::alias("tenant"))
        .build()
        .unwrap();

    assert_eq!(kernel.handle(json_get("/")).await.body(), b"acme");
}
