// Copyright 2026 the Cube authors. MIT license.
//
// `ServiceResponse` global (§4.F.1 step 9, §D "ServiceResponse/raw-bytes/
// plain-string special-casing"). Grounded in `internal/context.go`'s
// `ServiceResponse{Status, Header, Data}` type: a controller that wants
// explicit control over status/headers constructs one and returns it
// instead of a plain value. We tag the returned object with a hidden
// marker key so `cube_core::context::ServiceResponse::from_v8` can
// recognise it ahead of the generic string/bytes/JSON fallbacks.

use std::cell::RefCell;
use std::rc::Rc;

use cube_core::vm::WorkerState;

pub const MARKER_KEY: &str = "__serviceResponse";

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    let function = v8::Function::new(scope, construct).unwrap();
    let key = v8::String::new(scope, "ServiceResponse").unwrap();
    global.set(scope, key.into(), function.into());
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let status = args.get(0).int32_value(scope).unwrap_or(200);
    let header = args.get(1);
    let data = args.get(2);

    let obj = v8::Object::new(scope);
    let marker_key = v8::String::new(scope, MARKER_KEY).unwrap();
    let marker_value = v8::Boolean::new(scope, true);
    obj.set(scope, marker_key.into(), marker_value.into());

    let status_key = v8::String::new(scope, "status").unwrap();
    let status_value = v8::Integer::new(scope, status);
    obj.set(scope, status_key.into(), status_value.into());

    let header_key = v8::String::new(scope, "header").unwrap();
    let header_value = if header.is_object() {
        header
    } else {
        v8::Object::new(scope).into()
    };
    obj.set(scope, header_key.into(), header_value);

    let data_key = v8::String::new(scope, "data").unwrap();
    obj.set(scope, data_key.into(), data);

    rv.set(obj.into());
}
