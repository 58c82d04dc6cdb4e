// Copyright 2026 the Cube authors. MIT license.
//
// `$native("decimal")` (§4.G). Grounded in `internal/module/decimal.go`:
// the native is a function `value => Decimal` parsing an arbitrary-
// precision decimal string (`shopspring/decimal` there, `rust_decimal`
// here). The returned object exposes the arithmetic `rust_decimal`
// supports and a `toString`, enough for scripts to do money-safe math
// without floating point.

use std::cell::RefCell;
use std::rc::Rc;

use rust_decimal::Decimal;
use std::str::FromStr;

use crate::support::{arg_string, make_string, set_method, throw, throw_on_err};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<cube_core::vm::WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, parse).unwrap();
    function.into()
}

fn parse(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(input) = arg_string(scope, &args, 0) else {
        throw(scope, "decimal(value): value must be a string");
        return;
    };
    let Some(value) = throw_on_err(scope, Decimal::from_str(&input)) else {
        return;
    };
    rv.set(make_decimal_object(scope, value));
}

fn make_decimal_object<'s>(scope: &mut v8::HandleScope<'s>, value: Decimal) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    let key = v8::String::new(scope, "__decimal").unwrap();
    let repr = make_string(scope, &value.to_string());
    obj.set(scope, key.into(), repr);
    set_method(scope, obj, "add", add);
    set_method(scope, obj, "sub", sub);
    set_method(scope, obj, "mul", mul);
    set_method(scope, obj, "div", div);
    set_method(scope, obj, "toString", to_string);
    obj.into()
}

fn this_decimal(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Decimal> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__decimal").unwrap();
    let value = object.get(scope, key.into())?;
    let text = value.to_string(scope)?.to_rust_string_lossy(scope);
    Decimal::from_str(&text).ok()
}

fn other_decimal(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<Decimal> {
    let arg = args.get(index);
    if arg.is_string() {
        return Decimal::from_str(&arg.to_rust_string_lossy(scope)).ok();
    }
    this_decimal(scope, arg)
}

fn binary_op(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    op: impl Fn(Decimal, Decimal) -> Decimal,
) -> Option<Decimal> {
    let this = this_decimal(scope, args.this().into())?;
    let other = other_decimal(scope, args, 0)?;
    Some(op(this, other))
}

fn add(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(result) = binary_op(scope, &args, |a, b| a + b) {
        rv.set(make_decimal_object(scope, result));
    } else {
        throw(scope, "decimal.add: invalid operand");
    }
}

fn sub(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(result) = binary_op(scope, &args, |a, b| a - b) {
        rv.set(make_decimal_object(scope, result));
    } else {
        throw(scope, "decimal.sub: invalid operand");
    }
}

fn mul(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(result) = binary_op(scope, &args, |a, b| a * b) {
        rv.set(make_decimal_object(scope, result));
    } else {
        throw(scope, "decimal.mul: invalid operand");
    }
}

fn div(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(result) = binary_op(scope, &args, |a, b| a / b) {
        rv.set(make_decimal_object(scope, result));
    } else {
        throw(scope, "decimal.div: invalid operand");
    }
}

fn to_string(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    if let Some(value) = this_decimal(scope, args.this().into()) {
        rv.set(make_string(scope, &value.to_string()));
    }
}
