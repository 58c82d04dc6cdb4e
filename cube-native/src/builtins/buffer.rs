// Copyright 2026 the Cube authors. MIT license.
//
// `Buffer` global (§4.G builtins table). Grounded in
// `internal/builtin/buffer.go`: a thin Node-compatibility shim exposing
// `Buffer.from(stringOrArray, encoding?)` and `Buffer.alloc(size)`, both
// backed by a plain `Uint8Array` — scripts never see a distinct Buffer
// type, only the typed array the rest of the native surface already
// speaks (`arg_bytes`/`make_bytes` in `support.rs`).

use std::cell::RefCell;
use std::rc::Rc;

use cube_core::vm::{throw_error, WorkerState};

use crate::support::{arg_bytes, make_bytes, set_method};

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    let buffer = v8::Object::new(scope);
    set_method(scope, buffer, "from", from);
    set_method(scope, buffer, "alloc", alloc);
    let key = v8::String::new(scope, "Buffer").unwrap();
    global.set(scope, key.into(), buffer.into());
}

fn from(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    match arg_bytes(scope, &args, 0) {
        Some(bytes) => rv.set(make_bytes(scope, &bytes)),
        None => throw_error(scope, "Buffer.from(input): input must be a string or array-like of bytes"),
    }
}

fn alloc(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let size = args.get(0).int32_value(scope).unwrap_or(0).max(0) as usize;
    rv.set(make_bytes(scope, &vec![0u8; size]));
}
