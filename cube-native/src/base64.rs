// Copyright 2026 the Cube authors. MIT license.
//
// `$native("base64")` (§4.G). Grounded in `internal/module/base64.go`'s
// `Base64Client`: `Encode([]byte) string` / `Decode(string) ([]byte,
// error)`, both using the standard encoding (`base64.StdEncoding`).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::support::{arg_bytes, arg_string, make_bytes, make_string, set_method, throw};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &std::rc::Rc<std::cell::RefCell<cube_core::vm::WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "encode", encode);
    set_method(scope, obj, "decode", decode);
    obj.into()
}

fn encode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(bytes) = arg_bytes(scope, &args, 0) else {
        throw(scope, "base64.encode(input): input must be a string or Uint8Array");
        return;
    };
    let encoded = STANDARD.encode(bytes);
    rv.set(make_string(scope, &encoded));
}

fn decode(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(input) = arg_string(scope, &args, 0) else {
        throw(scope, "base64.decode(input): input must be a string");
        return;
    };
    match STANDARD.decode(input) {
        Ok(bytes) => rv.set(make_bytes(scope, &bytes)),
        Err(err) => throw(scope, &err.to_string()),
    }
}
