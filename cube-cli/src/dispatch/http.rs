// Copyright 2026 the Cube authors. MIT license.
//
// HTTP service dispatcher (§4.F.1) plus the rest of the HTTP surface
// table in §6: the `/source` authoring stub behind digest auth,
// `GET /resource/<url>`, and `GET /` static serving. Grounded in
// `original_source/internal/handler/service.go` (the dispatch sequence:
// route match, method check, acquire, timeout/cancel race, run, marshal)
// and `internal/handler/resource.go`/`document.go` for the two static
// routes.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};

use cube_core::pool::HttpCall;

use crate::digest;
use crate::response::{self, plain_text, BoxBody};
use crate::server::ConnWatch;
use crate::state::AppState;

/// §4.F.1 step 4: a 60-second ceiling on any single controller run.
const SERVICE_TIMEOUT: Duration = Duration::from_secs(60);

/// How often the disconnect watcher re-peeks the connection (§4.F.1
/// step 5) while a controller is running.
const DISCONNECT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub async fn serve(state: Arc<AppState>, req: Request<Incoming>) -> Result<Response<BoxBody>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    let response = if let Some(rest) = path.strip_prefix("/service/") {
        dispatch_service(&state, req, rest).await
    } else if let Some(rest) = path.strip_prefix("/source") {
        dispatch_source(&state, &req, &method, rest).await
    } else if let Some(url) = path.strip_prefix("/resource/") {
        dispatch_resource(&state, url)
    } else if method == Method::GET {
        dispatch_static(&state, &path)
    } else {
        plain_text(StatusCode::NOT_FOUND, "not found")
    };
    Ok(response)
}

/// §4.F.1 steps 1-10.
async fn dispatch_service(state: &Arc<AppState>, req: Request<Incoming>, rest: &str) -> Response<BoxBody> {
    let path = format!("/{rest}");
    let matched = { state.routes.read().matches(&path).map(|m| (m.name.to_string(), m.method.to_string(), m.vars)) };

    let Some((name, required_method, route_vars)) = matched else {
        return plain_text(StatusCode::NOT_FOUND, "not found");
    };

    // step 2: method constraint.
    if !required_method.is_empty() && !required_method.eq_ignore_ascii_case(req.method().as_str()) {
        return plain_text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    // step 3: acquire. Exhausted -> 503, never queue.
    let Some(mut ticket) = state.pool.try_acquire() else {
        return plain_text(StatusCode::SERVICE_UNAVAILABLE, "service unavailable");
    };

    let watch = req.extensions().get::<ConnWatch>().cloned();
    let method_str = req.method().to_string();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let query: Vec<(String, String)> = parse_query_pairs(req.uri().query().unwrap_or(""));
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(_) => Vec::new(),
    };
    let form = if content_type.starts_with("application/x-www-form-urlencoded") {
        parse_query_pairs(&String::from_utf8_lossy(&body_bytes))
    } else {
        Vec::new()
    };

    let call = HttpCall {
        method: method_str,
        path,
        headers,
        query,
        form,
        body: body_bytes,
        route_vars,
    };

    // steps 4-5: timeout and client-cancel both feed the same cancel
    // channel `PoolTicket::run_http` races internally. The timeout is the
    // `default(timeout)` branch `run_http` already races; the
    // disconnect watcher below is what feeds `cancel_tx` for step 5, by
    // peeking the duplicated connection fd handed down from `server.rs`
    // for an orderly-shutdown (EOF) or error, either of which means the
    // client is gone.
    let (cancel_tx, cancel_rx) = bounded(1);
    let watcher = watch.map(|watch| {
        tokio::spawn(async move {
            let mut probe = [0u8; 1];
            loop {
                match watch.0.peek(&mut probe).await {
                    Ok(0) => {
                        let _ = cancel_tx.send(());
                        return;
                    }
                    Ok(_) => tokio::time::sleep(DISCONNECT_POLL_INTERVAL).await,
                    Err(_) => {
                        let _ = cancel_tx.send(());
                        return;
                    }
                }
            }
        })
    });

    let import_id = format!("./controller/{name}");
    let outcome = tokio::task::spawn_blocking(move || ticket.run_http(&import_id, call, SERVICE_TIMEOUT, cancel_rx)).await;

    if let Some(watcher) = watcher {
        watcher.abort();
    }

    match outcome {
        Ok(Ok(outcome)) => response::build_response(outcome),
        Ok(Err(err)) => response::error_response(&err),
        Err(join_err) => {
            tracing::error!(error = %join_err, controller = %name, "controller run task panicked");
            plain_text(StatusCode::BAD_REQUEST, "internal error")
        }
    }
}

/// `/resource/<url>` (§D, §6): raw active resource content by URL.
fn dispatch_resource(state: &Arc<AppState>, url: &str) -> Response<BoxBody> {
    match state.store.get_resource(&format!("/{url}")) {
        Ok(bytes) => response::raw_bytes(StatusCode::OK, guess_content_type(url), bytes),
        Err(_) => plain_text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// `GET /` (§6): the authoring UI's static bundle is out of scope, but
/// the route itself — served from the `template`-kind store the same
/// way the original's `document.go` reads a named template row — is
/// part of the HTTP surface table and is served here against an `index`
/// template artifact when one is active.
fn dispatch_static(state: &Arc<AppState>, path: &str) -> Response<BoxBody> {
    let name = if path == "/" { "index" } else { path.trim_start_matches('/') };
    match state.store.get_template(name) {
        Ok(content) => response::raw_bytes(StatusCode::OK, "text/html; charset=utf-8", content.into_bytes()),
        Err(_) => plain_text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// `/source` (§6, §D): CRUD business logic is out of scope (§1), but the
/// route and its digest-auth gate are part of the HTTP surface and are
/// implemented here, grounded in
/// `original_source/internal/handler/handler.go`'s `authenticate`
/// wrapper.
async fn dispatch_source(state: &Arc<AppState>, req: &Request<Incoming>, method: &Method, _rest: &str) -> Response<BoxBody> {
    let Some((user, pass)) = state.config.auth_credentials() else {
        return plain_text(StatusCode::SERVICE_UNAVAILABLE, "authoring endpoint not configured");
    };
    if !digest::verify(req.headers(), method.as_str(), &state.auth_nonce, user, pass) {
        return digest::unauthorized(&state.auth_nonce, &state.auth_opaque);
    }
    // Authenticated but the CRUD body itself is out of scope (§1).
    plain_text(StatusCode::NOT_IMPLEMENTED, "source CRUD is not implemented in this build")
}

fn guess_content_type(url: &str) -> &'static str {
    if url.ends_with(".css") {
        "text/css"
    } else if url.ends_with(".js") {
        "application/javascript"
    } else if url.ends_with(".svg") {
        "image/svg+xml"
    } else if url.ends_with(".png") {
        "image/png"
    } else if url.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

fn parse_query_pairs(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(part), String::new()),
        })
        .collect()
}

/// A small percent-decoder covering `%XX` escapes and `+` as space (form
/// encoding), enough for query strings and urlencoded bodies without
/// taking on the `url` crate as a direct dependency purely for this.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_decode_handles_space_and_escapes() {
        assert_eq!(percent_decode("a+b%20c"), "a b c");
    }

    #[test]
    fn parse_query_pairs_splits_and_decodes() {
        let pairs = parse_query_pairs("who=world&x=1%2B1");
        assert_eq!(pairs[0], ("who".to_string(), "world".to_string()));
        assert_eq!(pairs[1], ("x".to_string(), "1+1".to_string()));
    }
}
