// Copyright 2026 the Cube authors. MIT license.
//
// `fetch` (§4.G builtins table; §5 "fetch resolution" is named as one of
// the event loop's suspension points). Grounded in
// `internal/builtin/fetch.go`: a WHATWG-flavoured `fetch(url, options)`
// returning a promise of a response whose body accessors are synchronous
// (the original reads the whole body before resolving, same as here) —
// the full streaming/mTLS/proxy-capable client lives in the separate
// `http` native module (`cube_native::http`), grounded in
// `internal/module/http.go`.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use cube_core::vm::{state_from_scope, Job, WorkerState};

use crate::support::{arg_string, make_bytes, set_method};

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    set_method(scope, global, "fetch", fetch);
}

struct FetchRequest {
    url: String,
    method: String,
    headers: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

fn read_options(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> FetchRequest {
    let mut method = "GET".to_string();
    let mut headers = Vec::new();
    let mut body = None;

    if let Ok(opts) = v8::Local::<v8::Object>::try_from(args.get(1)) {
        if let Some(key) = v8::String::new(scope, "method") {
            if let Some(v) = opts.get(scope, key.into()) {
                if v.is_string() {
                    method = v.to_rust_string_lossy(scope);
                }
            }
        }
        if let Some(key) = v8::String::new(scope, "body") {
            if let Some(v) = opts.get(scope, key.into()) {
                if v.is_string() {
                    body = Some(v.to_rust_string_lossy(scope).into_bytes());
                }
            }
        }
        if let Some(key) = v8::String::new(scope, "headers") {
            if let Some(v) = opts.get(scope, key.into()) {
                if let Ok(header_obj) = v8::Local::<v8::Object>::try_from(v) {
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
        }
    }

    FetchRequest {
        url: arg_string(scope, args, 0).unwrap_or_default(),
        method,
        headers,
        body,
    }
}

fn fetch(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let request = read_options(scope, &args);
    let resolver = v8::PromiseResolver::new(scope).expect("PromiseResolver::new");
    let promise = resolver.get_promise(scope);
    let resolver_global = v8::Global::new(scope, resolver);

    let state = state_from_scope(scope);
    let trigger = state.borrow().event_loop.new_trigger();

    thread::spawn(move || {
        let result = run_request(request).map_err(|e| e.to_string());
        let job: Job = Box::new(move |worker| {
            worker.with_scope(|scope| {
                let resolver = v8::Local::new(scope, &resolver_global);
                match build_response_object(scope, result) {
                    Ok(value) => {
                        resolver.resolve(scope, value);
                    }
                    Err(exception) => {
                        resolver.reject(scope, exception);
                    }
                }
            });
        });
        trigger.add_task(job);
        trigger.cancel();
    });

    rv.set(promise.into());
}

struct FetchResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

fn run_request(request: FetchRequest) -> anyhow::Result<FetchResponse> {
    let client = reqwest::blocking::Client::new();
    let method = reqwest::Method::from_bytes(request.method.as_bytes())?;
    let mut builder = client.request(method, &request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.body(body);
    }
    let response = builder.send()?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
        .collect();
    let body = response.bytes()?.to_vec();
    Ok(FetchResponse { status, headers, body })
}

pub fn build_response_object<'s>(
    scope: &mut v8::HandleScope<'s>,
    response: Result<FetchResponse, String>,
) -> Result<v8::Local<'s, v8::Value>, v8::Local<'s, v8::Value>> {
    match response {
        Ok(response) => {
            let obj = v8::Object::new(scope);
            let status_key = v8::String::new(scope, "status").unwrap();
            obj.set(scope, status_key.into(), v8::Integer::new(scope, response.status as i32).into());
            let ok_key = v8::String::new(scope, "ok").unwrap();
            obj.set(scope, ok_key.into(), v8::Boolean::new(scope, response.status < 400).into());

            let header_obj = v8::Object::new(scope);
            for (name, value) in &response.headers {
                if let (Some(k), Some(v)) = (v8::String::new(scope, name), v8::String::new(scope, value)) {
                    header_obj.set(scope, k.into(), v.into());
                }
            }
            let headers_key = v8::String::new(scope, "headers").unwrap();
            obj.set(scope, headers_key.into(), header_obj.into());

            let body_text = String::from_utf8_lossy(&response.body).into_owned();
            let text_value = v8::String::new(scope, &body_text).map(|s| s.into()).unwrap_or_else(|| v8::undefined(scope).into());
            let text_key = v8::String::new(scope, "text").unwrap();
            obj.set(scope, text_key.into(), text_value);

            let bytes_value = make_bytes(scope, &response.body);
            let bytes_key = v8::String::new(scope, "bytes").unwrap();
            obj.set(scope, bytes_key.into(), bytes_value);

            if let Some(json_text) = v8::String::new(scope, &body_text) {
                if let Some(parsed) = v8::json::parse(scope, json_text) {
                    let json_key = v8::String::new(scope, "json").unwrap();
                    obj.set(scope, json_key.into(), parsed);
                }
            }

            Ok(obj.into())
        }
        Err(message) => {
            let msg = v8::String::new(scope, &message).unwrap();
            Err(v8::Exception::error(scope, msg))
        }
    }
}
