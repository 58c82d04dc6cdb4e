// Copyright 2026 the Cube authors. MIT license.
//
// `$native("ulid")` (§4.G). Grounded in `internal/module/ulid.go`'s
// `CreateULID`: the native itself IS the generator function (not an
// object with a method), monotonic within the same millisecond the way
// the `ulid` crate's `Generator` guarantees.

use std::cell::RefCell;
use std::rc::Rc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ulid::Generator;

use crate::support::make_string;

static GENERATOR: Lazy<Mutex<Generator>> = Lazy::new(|| Mutex::new(Generator::new()));

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<cube_core::vm::WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, generate).unwrap();
    function.into()
}

fn generate(scope: &mut v8::HandleScope, _args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let id = GENERATOR
        .lock()
        .generate()
        .expect("ulid generator exhausted randomness for this millisecond");
    rv.set(make_string(scope, &id.to_string()));
}
