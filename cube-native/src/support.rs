// Copyright 2026 the Cube authors. MIT license.
//
// Shared V8-binding plumbing used by every capability module in this
// crate. The pattern (plain fn-pointer callbacks, state recovered from
// the isolate slot) is established in `cube_core::worker`/`registry`;
// this file only factors out the repetitive parts so each module reads
// close to the Go source it is grounded on instead of being dominated by
// binding boilerplate.

use cube_core::vm::{state_from_scope, throw_error, WorkerState};
use std::cell::RefCell;
use std::rc::Rc;

pub fn set_method(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
    let key = v8::String::new(scope, name).unwrap();
    let function = v8::Function::new(scope, callback).unwrap();
    target.set(scope, key.into(), function.into());
}

pub fn worker_state(scope: &mut v8::HandleScope) -> Rc<RefCell<WorkerState>> {
    state_from_scope(scope)
}

pub fn arg_string(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<String> {
    args.get(index).to_string(scope).map(|s| s.to_rust_string_lossy(scope))
}

pub fn arg_bytes(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<Vec<u8>> {
    let value = args.get(index);
    if value.is_string() {
        return Some(value.to_rust_string_lossy(scope).into_bytes());
    }
    if let Ok(view) = v8::Local::<v8::ArrayBufferView>::try_from(value) {
        let len = view.byte_length();
        let mut bytes = vec![0u8; len];
        view.copy_contents(&mut bytes);
        return Some(bytes);
    }
    None
}

pub fn make_bytes<'s>(scope: &mut v8::HandleScope<'s>, bytes: &[u8]) -> v8::Local<'s, v8::Value> {
    let store = v8::ArrayBuffer::new_backing_store_from_vec(bytes.to_vec()).make_shared();
    let buffer = v8::ArrayBuffer::with_backing_store(scope, &store);
    let array = v8::Uint8Array::new(scope, buffer, 0, bytes.len()).expect("Uint8Array::new");
    array.into()
}

pub fn make_string<'s>(scope: &mut v8::HandleScope<'s>, value: &str) -> v8::Local<'s, v8::Value> {
    v8::String::new(scope, value).unwrap().into()
}

pub fn throw(scope: &mut v8::HandleScope, message: &str) {
    throw_error(scope, message);
}

/// Serialises a `serde_json::Value` into the isolate via V8's own JSON
/// parser, the cheapest way to cross the Rust/V8 boundary without a
/// field-by-field `serde_v8` walk (used by natives whose result shape is
/// naturally a `serde_json::Value`: `db` rows, `cache` entries).
pub fn make_json<'s>(scope: &mut v8::HandleScope<'s>, value: &serde_json::Value) -> v8::Local<'s, v8::Value> {
    let text = value.to_string();
    let source = v8::String::new(scope, &text).unwrap();
    v8::json::parse(scope, source).unwrap_or_else(|| v8::undefined(scope).into())
}

/// Reads a `v8::Local<Value>` back into a `serde_json::Value` via the
/// same round-trip in reverse, for natives that accept a script value as
/// input (`cache.set(key, value)`, `db.exec(sql, params)`).
pub fn read_json(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> serde_json::Value {
    match v8::json::stringify(scope, value) {
        Some(text) => serde_json::from_str(&text.to_rust_string_lossy(scope)).unwrap_or(serde_json::Value::Null),
        None => serde_json::Value::Null,
    }
}

pub fn arg_i64(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<i64> {
    args.get(index).integer_value(scope)
}

/// Maps a `Result<T, E: Display>` into a script exception with `rv` left
/// untouched on error, the idiom every capability below uses to surface a
/// Rust/library error the way `internal/module/*.go`'s plain Go `error`
/// returns become a thrown `goja` exception.
pub fn throw_on_err<T, E: std::fmt::Display>(
    scope: &mut v8::HandleScope,
    result: Result<T, E>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            throw(scope, &err.to_string());
            None
        }
    }
}
