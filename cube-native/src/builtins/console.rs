// Copyright 2026 the Cube authors. MIT license.
//
// `console` (§4.G builtins table). Grounded in `internal/builtin/console.go`:
// `log`/`info`/`warn`/`error` each join their arguments with a space and
// write a line to the process log. The original writes straight to a file
// handle; here each level maps onto the matching `tracing` macro so every
// script log line carries the worker id through the same structured
// pipeline as the rest of the runtime (§C "Ambient stack").

use std::cell::RefCell;
use std::rc::Rc;

use cube_core::vm::{state_from_scope, WorkerState};

use crate::support::set_method;

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    let console = v8::Object::new(scope);
    set_method(scope, console, "log", log);
    set_method(scope, console, "info", info);
    set_method(scope, console, "warn", warn);
    set_method(scope, console, "error", error);
    set_method(scope, console, "debug", debug);
    let key = v8::String::new(scope, "console").unwrap();
    global.set(scope, key.into(), console.into());
}

fn join_args(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> String {
    let mut parts = Vec::with_capacity(args.length() as usize);
    for i in 0..args.length() {
        let value = args.get(i);
        let text = if value.is_string() {
            value.to_rust_string_lossy(scope)
        } else {
            v8::json::stringify(scope, value)
                .map(|s| s.to_rust_string_lossy(scope))
                .unwrap_or_else(|| value.to_rust_string_lossy(scope))
        };
        parts.push(text);
    }
    parts.join(" ")
}

fn worker_id(scope: &mut v8::HandleScope) -> usize {
    state_from_scope(scope).borrow().id
}

fn log(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let id = worker_id(scope);
    let line = join_args(scope, &args);
    tracing::info!(worker = id, "{line}");
}

fn info(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
    log(scope, args, rv);
}

fn debug(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let id = worker_id(scope);
    let line = join_args(scope, &args);
    tracing::debug!(worker = id, "{line}");
}

fn warn(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let id = worker_id(scope);
    let line = join_args(scope, &args);
    tracing::warn!(worker = id, "{line}");
}

fn error(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let id = worker_id(scope);
    let line = join_args(scope, &args);
    tracing::error!(worker = id, "{line}");
}
