// Copyright 2026 the Cube authors. MIT license.
//
// `$native("http")` (§4.G "http | configurable synchronous HTTP
// client"). Grounded in `internal/module/http.go`'s `HttpClient`:
// `$native("http")(options)` builds a client (optionally with a custom
// CA, client certificate, or disabled verification), and the returned
// object's `request(method, url, headers, body)` performs one
// synchronous round trip. The original also supports HTTP/3 and an
// upstream proxy; per §1's "registration mechanism is in scope,
// internals are not" we keep the client-construction surface (`caCert`,
// `insecureSkipVerify`) and the synchronous request call, built on
// `reqwest::blocking` exactly as `fetch` is, and drop the HTTP/3/proxy
// transport selection (see DESIGN.md).

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};

use cube_core::vm::WorkerState;

use crate::support::{arg_string, make_bytes, set_method, throw};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, construct).unwrap();
    function.into()
}

fn build_client(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> Result<Client, String> {
    let mut builder = ClientBuilder::new().timeout(Duration::from_secs(60));

    if let Ok(opts) = v8::Local::<v8::Object>::try_from(args.get(0)) {
        if let Some(ca_cert) = get_string(scope, opts, "caCert") {
            let cert = reqwest::Certificate::from_pem(ca_cert.as_bytes()).map_err(|e| e.to_string())?;
            builder = builder.add_root_certificate(cert);
        }
        if let Some(insecure) = get_bool(scope, opts, "insecureSkipVerify") {
            builder = builder.danger_accept_invalid_certs(insecure);
        }
    }

    builder.build().map_err(|e| e.to_string())
}

fn get_string(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str) -> Option<String> {
    let key = v8::String::new(scope, name)?;
    let value = obj.get(scope, key.into())?;
    value.is_string().then(|| value.to_rust_string_lossy(scope))
}

fn get_bool(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str) -> Option<bool> {
    let key = v8::String::new(scope, name)?;
    let value = obj.get(scope, key.into())?;
    value.is_boolean().then(|| value.boolean_value(scope))
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    match build_client(scope, &args) {
        Ok(client) => rv.set(bind_client(scope, client).into()),
        Err(message) => throw(scope, &message),
    }
}

fn bind_client<'s>(scope: &mut v8::HandleScope<'s>, client: Client) -> v8::Local<'s, v8::Object> {
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(Arc::new(client)) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__client").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "request", request);
    obj
}

fn client_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Client> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__client")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Client;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = (*borrowed).clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn request(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(client) = client_of(scope, args.this().into()) else {
        throw(scope, "httpClient.request: not a client");
        return;
    };
    let Some(method) = arg_string(scope, &args, 0) else {
        throw(scope, "request(method, url, headers, body): method must be a string");
        return;
    };
    let Some(url) = arg_string(scope, &args, 1) else {
        throw(scope, "request(method, url, headers, body): url must be a string");
        return;
    };

    let mut builder = match reqwest::Method::from_bytes(method.to_uppercase().as_bytes()) {
        Ok(method) => client.request(method, &url),
        Err(err) => {
            throw(scope, &err.to_string());
            return;
        }
    };

    if let Ok(headers) = v8::Local::<v8::Object>::try_from(args.get(2)) {
        if let Some(names) = headers.get_own_property_names(scope, Default::default()) {
            for i in 0..names.length() {
                if let Some(name) = names.get_index(scope, i) {
                    let name_str = name.to_rust_string_lossy(scope);
                    if let Some(value) = headers.get(scope, name) {
                        builder = builder.header(name_str, value.to_rust_string_lossy(scope));
                    }
                }
            }
        }
    }

    if let Some(body) = arg_string(scope, &args, 3) {
        builder = builder.body(body);
    }

    match builder.send() {
        Ok(response) => {
            let status = response.status().as_u16();
            let mut header_pairs = Vec::new();
            for (name, value) in response.headers() {
                header_pairs.push((name.to_string(), value.to_str().unwrap_or_default().to_string()));
            }
            let body = response.bytes().map(|b| b.to_vec()).unwrap_or_default();

            let obj = v8::Object::new(scope);
            let status_key = v8::String::new(scope, "status").unwrap();
            obj.set(scope, status_key.into(), v8::Integer::new(scope, status as i32).into());

            let header_obj = v8::Object::new(scope);
            for (name, value) in &header_pairs {
                if let (Some(k), Some(v)) = (v8::String::new(scope, name), v8::String::new(scope, value)) {
                    header_obj.set(scope, k.into(), v.into());
                }
            }
            let header_key = v8::String::new(scope, "header").unwrap();
            obj.set(scope, header_key.into(), header_obj.into());

            let data_key = v8::String::new(scope, "data").unwrap();
            let data_value = make_bytes(scope, &body);
            obj.set(scope, data_key.into(), data_value);

            rv.set(obj.into());
        }
        Err(err) => throw(scope, &err.to_string()),
    }
}
