// Copyright 2026 the Cube authors. MIT license.
//
// The HTTP run context (§3 "Run context", §D "full ServiceContext
// surface"). Grounded in `internal/context.go`'s `Context` type: header,
// query, form, raw body, JSON body, route variables, response
// header/status, chunked writes, and an HTTP/2 push hint. Daemon and
// crontab runs have no context at all (§3) — `WorkerState.http` is
// simply `None` for those runs, and every `ctx.*` native here throws if
// called outside an HTTP-triggered run instead of silently no-op'ing.
//
// Unlike `require`/`$native`, `ctx` is not a Worker-lifetime global: the
// HTTP dispatcher builds a fresh context object and request state per
// call (`HttpRequestState`), installs it via `Worker::set_http_context`,
// and passes the `ctx` object itself as an argument to the controller's
// entry function, the same shape `internal/handler/handler.go` uses
// (`fn(ctx)` as the controller signature).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::vm::{state_from_scope, throw_error};

/// Per-request state a controller's `ctx` argument reads from and writes
/// to. Built by the HTTP dispatcher from the inbound request, installed
/// into the Worker before `run_entry`, and read back afterwards to
/// assemble the outbound response.
pub struct HttpRequestState {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub route_vars: HashMap<String, String>,

    pub response_status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Vec<u8>,
    /// Set the first time `ctx.write` is called. A controller that writes
    /// directly takes over response framing (§D "chunked-flush
    /// `returnless` paths"); its return value is then ignored rather than
    /// double-sent.
    pub streamed: bool,
    pub push_hints: Vec<String>,
}

impl HttpRequestState {
    pub fn new(
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        query: Vec<(String, String)>,
        form: Vec<(String, String)>,
        body: Vec<u8>,
        route_vars: HashMap<String, String>,
    ) -> Self {
        Self {
            method,
            path,
            headers,
            query,
            form,
            body,
            route_vars,
            response_status: 200,
            response_headers: Vec::new(),
            response_body: Vec::new(),
            streamed: false,
            push_hints: Vec::new(),
        }
    }

    fn find<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
        pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a controller's return value marshals to (§D "`ServiceResponse`/
/// raw-bytes/plain-string response special-casing", grounded in
/// `internal/handler/handler.go`'s `toSuccess` type switch: `string`,
/// `[]byte`, and everything else falling through to `json.Marshal`).
pub enum ServiceResponse {
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
    NoContent,
    /// A script-constructed `ServiceResponse{status, header, data}`
    /// (§D), which sets headers/status/body verbatim rather than going
    /// through the default envelope.
    Structured {
        status: u16,
        headers: Vec<(String, String)>,
        body: Box<ServiceResponse>,
    },
}

/// The hidden marker key `builtins::service_response` tags its
/// constructed objects with, duplicated here rather than taking a
/// dependency on `cube_native` (which already depends on `cube_core`).
const SERVICE_RESPONSE_MARKER: &str = "__serviceResponse";

impl ServiceResponse {
    pub fn from_v8(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Self {
        if value.is_undefined() || value.is_null() {
            return ServiceResponse::NoContent;
        }
        if value.is_uint8_array() || value.is_array_buffer_view() {
            if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
                let len = view.byte_length();
                let mut bytes = vec![0u8; len];
                view.copy_contents(&mut bytes);
                return ServiceResponse::Bytes(bytes);
            }
        }
        if value.is_string() {
            return ServiceResponse::Text(value.to_rust_string_lossy(scope));
        }
        if let Some(structured) = Self::from_structured(scope, value) {
            return structured;
        }
        match v8::json::stringify(scope, value) {
            Some(json_str) => {
                let text = json_str.to_rust_string_lossy(scope);
                match serde_json::from_str(&text) {
                    Ok(parsed) => ServiceResponse::Json(parsed),
                    Err(_) => ServiceResponse::Text(text),
                }
            }
            None => ServiceResponse::NoContent,
        }
    }

    fn from_structured(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Self> {
        let object: v8::Local<v8::Object> = value.try_into().ok()?;
        let marker_key = v8::String::new(scope, SERVICE_RESPONSE_MARKER)?;
        let is_marked = object
            .get(scope, marker_key.into())
            .map(|v| v.is_true())
            .unwrap_or(false);
        if !is_marked {
            return None;
        }

        let status_key = v8::String::new(scope, "status")?;
        let status = object
            .get(scope, status_key.into())
            .and_then(|v| v.int32_value(scope))
            .unwrap_or(200) as u16;

        let header_key = v8::String::new(scope, "header")?;
        let mut headers = Vec::new();
        if let Some(header_value) = object.get(scope, header_key.into()) {
            if let Ok(header_obj) = v8::Local::<v8::Object>::try_from(header_value) {
                if let Some(names) = header_obj.get_own_property_names(scope, Default::default()) {
                    for i in 0..names.length() {
                        if let Some(name) = names.get_index(scope, i) {
                            let name_str = name.to_rust_string_lossy(scope);
                            if let Some(value) = header_obj.get(scope, name) {
                                headers.push((name_str, value.to_rust_string_lossy(scope)));
                            }
                        }
                    }
                }
            }
        }

        let data_key = v8::String::new(scope, "data")?;
        let data = object.get(scope, data_key.into()).unwrap_or_else(|| v8::undefined(scope).into());
        let body = ServiceResponse::from_v8(scope, data);

        Some(ServiceResponse::Structured {
            status,
            headers,
            body: Box::new(body),
        })
    }
}

/// What the HTTP dispatcher gets back after a controller run completes,
/// entirely owned data so it can cross back from the Worker's thread to
/// whichever thread is assembling the outbound `hyper::Response`
/// (`cube_core::pool::PoolTicket::run_http`).
pub struct HttpOutcome {
    pub result: crate::error::CubeResult<ServiceResponse>,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub streamed: bool,
    pub streamed_body: Vec<u8>,
    pub push_hints: Vec<String>,
}

/// Builds the script-visible `ctx` object passed as the controller's
/// argument. Every method looks up the active `HttpRequestState` through
/// the Worker's isolate slot rather than capturing it directly, since V8
/// function callbacks are plain function pointers with no closure
/// environment (see `registry.rs`).
pub fn build_service_context<'s>(scope: &mut v8::HandleScope<'s>) -> v8::Local<'s, v8::Object> {
    let ctx = v8::Object::new(scope);
    set_method(scope, ctx, "method", ctx_method);
    set_method(scope, ctx, "path", ctx_path);
    set_method(scope, ctx, "header", ctx_header);
    set_method(scope, ctx, "query", ctx_query);
    set_method(scope, ctx, "form", ctx_form);
    set_method(scope, ctx, "param", ctx_param);
    set_method(scope, ctx, "body", ctx_body);
    set_method(scope, ctx, "json", ctx_json);
    set_method(scope, ctx, "setHeader", ctx_set_header);
    set_method(scope, ctx, "status", ctx_status);
    set_method(scope, ctx, "write", ctx_write);
    set_method(scope, ctx, "push", ctx_push);
    ctx
}

fn set_method(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
    let key = v8::String::new(scope, name).unwrap();
    let function = v8::Function::new(scope, callback).unwrap();
    target.set(scope, key.into(), function.into());
}

fn active_http(scope: &mut v8::HandleScope) -> Option<Rc<RefCell<HttpRequestState>>> {
    let state = state_from_scope(scope);
    let http = state.borrow().http.clone();
    if http.is_none() {
        throw_error(
            scope,
            "ctx is not available in this run: daemon and crontab runs have no HTTP context",
        );
    }
    http
}

fn arg_string(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<String> {
    args.get(index).to_string(scope).map(|s| s.to_rust_string_lossy(scope))
}

fn ctx_method(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(http) = active_http(scope) {
        let method = http.borrow().method.clone();
        let value = v8::String::new(scope, &method).unwrap();
        rv.set(value.into());
    }
}

fn ctx_path(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(http) = active_http(scope) {
        let path = http.borrow().path.clone();
        let value = v8::String::new(scope, &path).unwrap();
        rv.set(value.into());
    }
}

fn ctx_header(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw_error(scope, "ctx.header(name): name must be a string");
        return;
    };
    if let Some(http) = active_http(scope) {
        let http = http.borrow();
        match HttpRequestState::find(&http.headers, &name) {
            Some(value) => {
                let value = v8::String::new(scope, value).unwrap();
                rv.set(value.into());
            }
            None => rv.set(v8::undefined(scope).into()),
        }
    }
}

fn ctx_query(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw_error(scope, "ctx.query(name): name must be a string");
        return;
    };
    if let Some(http) = active_http(scope) {
        let http = http.borrow();
        match HttpRequestState::find(&http.query, &name) {
            Some(value) => {
                let value = v8::String::new(scope, value).unwrap();
                rv.set(value.into());
            }
            None => rv.set(v8::undefined(scope).into()),
        }
    }
}

fn ctx_form(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw_error(scope, "ctx.form(name): name must be a string");
        return;
    };
    if let Some(http) = active_http(scope) {
        let http = http.borrow();
        match HttpRequestState::find(&http.form, &name) {
            Some(value) => {
                let value = v8::String::new(scope, value).unwrap();
                rv.set(value.into());
            }
            None => rv.set(v8::undefined(scope).into()),
        }
    }
}

fn ctx_param(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw_error(scope, "ctx.param(name): name must be a string");
        return;
    };
    if let Some(http) = active_http(scope) {
        let http = http.borrow();
        match http.route_vars.get(&name) {
            Some(value) => {
                let value = v8::String::new(scope, value).unwrap();
                rv.set(value.into());
            }
            None => rv.set(v8::undefined(scope).into()),
        }
    }
}

fn ctx_body(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(http) = active_http(scope) {
        let text = String::from_utf8_lossy(&http.borrow().body).into_owned();
        let value = v8::String::new(scope, &text).unwrap();
        rv.set(value.into());
    }
}

fn ctx_json(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(http) = active_http(scope) {
        let body = http.borrow().body.clone();
        let text = match v8::String::new(scope, &String::from_utf8_lossy(&body)) {
            Some(s) => s,
            None => return,
        };
        match v8::json::parse(scope, text) {
            Some(value) => rv.set(value),
            None => throw_error(scope, "ctx.json(): request body is not valid JSON"),
        }
    }
}

fn ctx_set_header(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let (Some(name), Some(value)) = (arg_string(scope, &args, 0), arg_string(scope, &args, 1)) else {
        throw_error(scope, "ctx.setHeader(name, value): both arguments must be strings");
        return;
    };
    if let Some(http) = active_http(scope) {
        http.borrow_mut().response_headers.push((name, value));
    }
}

fn ctx_status(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let code = args.get(0).int32_value(scope).unwrap_or(200);
    if let Some(http) = active_http(scope) {
        http.borrow_mut().response_status = code as u16;
    }
}

fn ctx_write(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let value = args.get(0);
    if let Some(http) = active_http(scope) {
        let mut http = http.borrow_mut();
        http.streamed = true;
        if value.is_string() {
            http.response_body
                .extend_from_slice(value.to_rust_string_lossy(scope).as_bytes());
        } else if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
            let len = view.byte_length();
            let mut bytes = vec![0u8; len];
            view.copy_contents(&mut bytes);
            http.response_body.extend_from_slice(&bytes);
        }
    }
}

fn ctx_push(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(path) = arg_string(scope, &args, 0) else {
        throw_error(scope, "ctx.push(path): path must be a string");
        return;
    };
    if let Some(http) = active_http(scope) {
        http.borrow_mut().push_hints.push(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_case_insensitive() {
        let pairs = vec![("Content-Type".to_string(), "text/plain".to_string())];
        assert_eq!(
            HttpRequestState::find(&pairs, "content-type"),
            Some("text/plain")
        );
        assert_eq!(HttpRequestState::find(&pairs, "x-missing"), None);
    }

    #[test]
    fn new_request_state_defaults_to_200_and_unstreamed() {
        let state = HttpRequestState::new(
            "GET".into(),
            "/hello".into(),
            vec![],
            vec![],
            vec![],
            vec![],
            HashMap::new(),
        );
        assert_eq!(state.response_status, 200);
        assert!(!state.streamed);
        assert!(state.response_body.is_empty());
    }
}
