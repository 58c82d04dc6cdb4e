// Copyright 2026 the Cube authors. MIT license.
//
// `$native("pipe")` (§4.G "pipe | named shared bqueue by name").
// Grounded in `internal/module/pipe.go`'s `PipeCache`: a process-wide map
// from name to a shared, fixed-capacity (99 in the original) bounded
// queue — every Worker that calls `pipe(name)` with the same name gets
// the same queue, unlike `bqueue`'s constructor which always mints a
// fresh one. Reuses `bqueue::Queue`/`bqueue::bind_object` rather than
// reimplementing put/poll/drain.

use std::cell::RefCell;
use std::rc::Rc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use cube_core::vm::WorkerState;

use crate::bqueue::{self, Queue};
use crate::support::{arg_string, throw};

/// Matches the original's `make(chan interface{}, 99)`.
const CAPACITY: usize = 99;

static PIPES: Lazy<DashMap<String, std::sync::Arc<Queue>>> = Lazy::new(DashMap::new);

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, construct).unwrap();
    function.into()
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "pipe(name): name must be a string");
        return;
    };
    let queue = PIPES.entry(name).or_insert_with(|| Queue::with_capacity(CAPACITY)).clone();
    rv.set(bqueue::bind_object(scope, queue).into());
}
