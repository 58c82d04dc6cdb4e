// Copyright 2026 the Cube authors. MIT license.
//
// Marshals a `cube_core::context::HttpOutcome` into a `hyper::Response`
// (§4.F.1 steps 8-10, §6 "On-wire response envelope"). Grounded in
// `original_source/internal/handler/handler.go`'s `toSuccess`/`toError`
// type switch: a plain string or byte buffer is written raw, a structured
// `ServiceResponse` sets status/headers/body verbatim, and everything
// else is wrapped in the `{code, message, data}` JSON envelope.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

use cube_core::{CubeError, HttpOutcome, ServiceResponse};

pub type BoxBody = Full<Bytes>;

pub fn envelope_ok(data: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"code": "0", "message": "success", "data": data})
}

pub fn envelope_err(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"code": code, "message": message})
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<BoxBody> {
    let body = serde_json::to_vec(value).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// Applies the non-error branch of §4.F.1 step 9.
fn service_response_to_hyper(status: u16, headers: &[(String, String)], body: &ServiceResponse) -> Response<BoxBody> {
    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status_code);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    match body {
        ServiceResponse::Text(text) => builder.body(Full::new(Bytes::from(text.clone().into_bytes()))).unwrap(),
        ServiceResponse::Bytes(bytes) => builder.body(Full::new(Bytes::from(bytes.clone()))).unwrap(),
        ServiceResponse::NoContent => builder.body(Full::new(Bytes::new())).unwrap(),
        ServiceResponse::Json(value) => {
            let body = serde_json::to_vec(&envelope_ok(value.clone())).unwrap_or_default();
            builder
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        ServiceResponse::Structured { status, headers, body } => service_response_to_hyper(*status, headers, body),
    }
}

/// Builds the final `hyper::Response` for a completed controller run.
/// `streamed` (§D "chunked-flush returnless paths") means the script
/// already wrote its own body via `ctx.write`; in that case the script's
/// return value is ignored entirely, matching §4.F.1 step 8's
/// `returnless` short-circuit.
pub fn build_response(outcome: HttpOutcome) -> Response<BoxBody> {
    if outcome.streamed {
        let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
        let mut builder = Response::builder().status(status);
        for (name, value) in &outcome.headers {
            builder = builder.header(name, value);
        }
        // §9 "Error surfaces when returnless=true": if the script errored
        // after a partial write, nothing further is written; the error is
        // logged by the caller, not surfaced here.
        if let Err(err) = &outcome.result {
            tracing::warn!(error = %err, "controller errored after taking over the response");
        }
        return builder.body(Full::new(Bytes::from(outcome.streamed_body))).unwrap();
    }

    match outcome.result {
        Ok(body) => {
            if outcome.status != 200 || !outcome.headers.is_empty() {
                service_response_to_hyper(outcome.status, &outcome.headers, &body)
            } else {
                match body {
                    ServiceResponse::Text(text) => Response::builder()
                        .status(StatusCode::OK)
                        .body(Full::new(Bytes::from(text.into_bytes())))
                        .unwrap(),
                    ServiceResponse::Bytes(bytes) => Response::builder()
                        .status(StatusCode::OK)
                        .body(Full::new(Bytes::from(bytes)))
                        .unwrap(),
                    ServiceResponse::NoContent => {
                        json_response(StatusCode::OK, &envelope_ok(serde_json::Value::Null))
                    }
                    ServiceResponse::Json(value) => json_response(StatusCode::OK, &envelope_ok(value)),
                    ServiceResponse::Structured { status, headers, body } => {
                        service_response_to_hyper(status, &headers, &body)
                    }
                }
            }
        }
        Err(err) => error_response(&err),
    }
}

/// §7 "ScriptException... surfaces to the HTTP client as a 400 envelope".
/// Timeout and Cancelled share the same mechanics with a different
/// reason string; NotFound/MethodNotAllowed/ServiceUnavailable are
/// handled earlier in the dispatcher and never reach this path.
pub fn error_response(err: &CubeError) -> Response<BoxBody> {
    let (code, message) = err.envelope();
    json_response(StatusCode::BAD_REQUEST, &envelope_err(&code, &message))
}

pub fn plain_text(status: StatusCode, text: &str) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(text.to_string().into_bytes())))
        .unwrap()
}

pub fn raw_bytes(status: StatusCode, content_type: &str, bytes: Vec<u8>) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", content_type)
        .body(Full::new(Bytes::from(bytes)))
        .unwrap()
}
