//! Minimal keel demo: a middleware group, validation and a few faults.
//!
//! Run with:
//!   RUST_LOG=debug APP_DEBUG=1 cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/users/0 -H 'accept: application/json'
//!   curl -X POST http://localhost:3000/users \
//!        -H 'accept: application/json' -H 'content-type: application/json' \
//!        -d '{"name":""}'
//!   curl -X POST http://localhost:3000/users -d 'name=&password=secret' -i
//!   curl http://localhost:3000/boom -H 'accept: application/json'
//!   curl -X DELETE http://localhost:3000/users/42 -i

use http::StatusCode;
use http::header::{HeaderName, HeaderValue};
use keel::middleware::{Next, Stage, trace};
use keel::{
    CurrentRequest, ExceptionHandler, Fault, Kernel, KernelConfig, Outcome, RecordNotFound, Request,
    Response, Router, Server, ValidationFault, bootstrapper,
};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), keel::Error> {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .get("/boom", boom);

    let kernel = Kernel::builder(app)
        .middleware(trace::stage())
        .middleware(Stage::group("web"))
        .alias("request-id", request_id)
        .alias("no-delete", no_delete)
        .group("web", [Stage::alias("no-delete"), Stage::alias("request-id")])
        .priority(["request-id", "no-delete"])
        .bootstrapper(bootstrapper("config", || Ok(())))
        .exception_handler(ExceptionHandler::new(KernelConfig::from_env()))
        .build()?;

    Server::bind("0.0.0.0:3000")?.serve(kernel).await
}

// Stamps every response with the kernel's sequence number for the request.
async fn request_id(req: Request, next: Next) -> Outcome {
    let id = CurrentRequest::of(&req).map_or(0, CurrentRequest::id);
    let mut response = next.run(req).await?;
    response
        .headers_mut()
        .insert(HeaderName::from_static("x-request-id"), HeaderValue::from(id));
    Ok(response)
}

// Short-circuits: DELETE never reaches the router.
async fn no_delete(req: Request, next: Next) -> Outcome {
    if req.method() == http::Method::DELETE {
        return Ok(Response::status(StatusCode::FORBIDDEN));
    }
    next.run(req).await
}

// GET /users/{id}. Id 0 does not exist.
async fn get_user(req: Request) -> Result<Response, Fault> {
    let id = req.param("id").unwrap_or_default().to_owned();
    if id == "0" {
        return Err(RecordNotFound::Model { model: "User".into(), ids: vec![id] }.into());
    }
    Ok(Response::json_value(&json!({ "id": id, "name": "alice" })))
}

// POST /users. JSON clients get a 422, forms get redirected back.
async fn create_user(req: Request) -> Result<Response, Fault> {
    let name = req.input_str("name").unwrap_or_default();
    if name.is_empty() {
        return Err(ValidationFault::field("name", "The name field is required.").into());
    }
    Ok(Response::builder().status(StatusCode::CREATED).json_value(&json!({ "name": name })))
}

// GET /boom. A 500 that only says more when APP_DEBUG is set.
async fn boom(_req: Request) -> Result<Response, Fault> {
    let parsed: serde_json::Value = serde_json::from_str("{not json")?;
    Ok(Response::json_value(&parsed))
}
