// Copyright 2026 the Cube authors. MIT license.
//
// `$native("bqueue")` (§4.G). Grounded in `internal/module/bqueue.go`'s
// `BQueue`: a bounded channel with `put`/`poll`/`drain`, each accepting an
// optional timeout in milliseconds (0 or omitted means block
// indefinitely, matching the Go source's `time.After` vs. plain channel
// op). `$native("bqueue")` itself is the constructor: calling it builds a
// fresh bounded queue of the requested capacity (`internal/module/
// bqueue.go`'s `CreateBQueue(size)`), distinct from `pipe`'s *named*,
// shared-by-name queues (`pipe.rs`).
//
// §5 "Synchronous native calls do not release the Worker — a long
// socket.read blocks the Worker entirely; this is by design." `put`/
// `poll`/`drain` below block the calling Worker's OS thread for up to the
// requested timeout, same as the original.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use cube_core::vm::WorkerState;

use crate::support::{arg_i64, make_json, read_json, set_method, throw};

/// Exposed at `pub(crate)` visibility, not just to this module, so
/// `pipe.rs` can build the named, shared-by-name variant of the same
/// queue (§4.G "pipe | named shared bqueue by name") without duplicating
/// the put/poll/drain logic.
pub(crate) struct Queue {
    tx: Sender<serde_json::Value>,
    rx: Receiver<serde_json::Value>,
}

impl Queue {
    pub(crate) fn with_capacity(capacity: usize) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Arc::new(Self { tx, rx })
    }
}

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, construct).unwrap();
    function.into()
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let capacity = arg_i64(scope, &args, 0).filter(|c| *c > 0).unwrap_or(16) as usize;
    let queue = Queue::with_capacity(capacity);
    rv.set(bind_object(scope, queue).into());
}

/// Builds the script-visible `{put, poll, drain, len}` wrapper around an
/// already-constructed queue. Shared with `pipe.rs`, which looks the
/// `Arc<Queue>` up (or creates it) by name instead of always minting a
/// fresh one.
pub(crate) fn bind_object<'s>(scope: &mut v8::HandleScope<'s>, queue: Arc<Queue>) -> v8::Local<'s, v8::Object> {
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(queue) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__queue").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "put", put);
    set_method(scope, obj, "poll", poll);
    set_method(scope, obj, "drain", drain);
    set_method(scope, obj, "len", len);
    obj
}

fn queue_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<Queue>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__queue")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Queue;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn timeout_of(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<Duration> {
    arg_i64(scope, args, index).filter(|ms| *ms > 0).map(|ms| Duration::from_millis(ms as u64))
}

fn put(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(queue) = queue_of(scope, args.this().into()) else {
        throw(scope, "bqueue.put: not a queue");
        return;
    };
    let value = read_json(scope, args.get(0));
    let ok = match timeout_of(scope, &args, 1) {
        Some(timeout) => queue.tx.send_timeout(value, timeout).is_ok(),
        None => queue.tx.send(value).is_ok(),
    };
    rv.set(v8::Boolean::new(scope, ok).into());
}

fn poll(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(queue) = queue_of(scope, args.this().into()) else {
        throw(scope, "bqueue.poll: not a queue");
        return;
    };
    let received = match timeout_of(scope, &args, 0) {
        Some(timeout) => queue.rx.recv_timeout(timeout).ok(),
        None => queue.rx.recv().ok(),
    };
    match received {
        Some(value) => rv.set(make_json(scope, &value)),
        None => rv.set(v8::null(scope).into()),
    }
}

fn drain(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(queue) = queue_of(scope, args.this().into()) else {
        throw(scope, "bqueue.drain: not a queue");
        return;
    };
    let mut values = Vec::new();
    while let Ok(value) = queue.rx.try_recv() {
        values.push(value);
    }
    rv.set(make_json(scope, &serde_json::Value::Array(values)));
}

fn len(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    match queue_of(scope, args.this().into()) {
        Some(queue) => rv.set(v8::Integer::new(scope, queue.rx.len() as i32).into()),
        None => throw(scope, "bqueue.len: not a queue"),
    }
}
