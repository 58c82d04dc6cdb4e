// Copyright 2026 the Cube authors. MIT license.
//
// `$native("event")` (§4.G "event | process-wide pub/sub bus"). Grounded
// in `internal/module/event.go`'s `EventBus`/`EventSubscriber`: a
// process-wide map from topic to subscriber list, `emit(topic, data)`
// broadcasting to every live subscriber of that topic, `createSubscriber`
// returning a pull handle (`Next`/`Cancel`) whose cancellation is wired
// through the owning Worker's defer exactly like `lock.rs`, and `on`
// layering a push-style callback over the same subscriber using the
// background-thread-to-`Job` bridge `timers.rs`/`websocket.rs` both use.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use cube_core::event_loop::EventTaskTrigger;
use cube_core::vm::{Job, WorkerState};

use crate::support::{arg_string, make_json, read_json, set_method, throw, worker_state};

struct Subscriber {
    trigger: EventTaskTrigger<Job>,
    tx: crossbeam_channel::Sender<serde_json::Value>,
    rx: crossbeam_channel::Receiver<serde_json::Value>,
}

static BUS: Lazy<DashMap<String, Vec<Arc<Subscriber>>>> = Lazy::new(DashMap::new);

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "emit", emit);
    set_method(scope, obj, "createSubscriber", create_subscriber);
    set_method(scope, obj, "on", on);
    obj.into()
}

/// Broadcasts to every not-yet-cancelled subscriber of `topic`, dropping
/// cancelled entries as it goes (the original's "通过位移法删除已关闭的通道"
/// — shift-delete closed channels during the same pass).
fn emit(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(topic) = arg_string(scope, &args, 0) else {
        throw(scope, "event.emit(topic, data): topic must be a string");
        return;
    };
    let data = read_json(scope, args.get(1));
    if let Some(mut subscribers) = BUS.get_mut(&topic) {
        subscribers.retain(|s| {
            if s.trigger.is_cancelled() {
                return false;
            }
            let _ = s.tx.send(data.clone());
            true
        });
    }
}

fn register(state: &Rc<RefCell<WorkerState>>, topics: &[String]) -> Arc<Subscriber> {
    let trigger = state.borrow().event_loop.new_trigger();
    let (tx, rx) = crossbeam_channel::unbounded();
    let subscriber = Arc::new(Subscriber { trigger, tx, rx });
    for topic in topics {
        BUS.entry(topic.clone()).or_default().push(subscriber.clone());
    }
    let defer_target = subscriber.clone();
    state.borrow_mut().add_defer(move || {
        defer_target.trigger.cancel();
    });
    subscriber
}

fn topics_of(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, from: i32) -> Vec<String> {
    (from..args.length()).filter_map(|i| arg_string(scope, args, i)).collect()
}

fn create_subscriber(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let topics = topics_of(scope, &args, 0);
    let state = worker_state(scope);
    let subscriber = register(&state, &topics);
    rv.set(bind_subscriber(scope, subscriber).into());
}

fn bind_subscriber<'s>(scope: &mut v8::HandleScope<'s>, subscriber: Arc<Subscriber>) -> v8::Local<'s, v8::Object> {
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(subscriber) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__subscriber").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "next", next);
    set_method(scope, obj, "cancel", cancel);
    obj
}

fn subscriber_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<Subscriber>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__subscriber")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Subscriber;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

/// Blocks the calling Worker's OS thread until the next emitted value or
/// cancellation (§5 "a long socket.read blocks the Worker entirely; this
/// is by design" applies equally here).
fn next(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(subscriber) = subscriber_of(scope, args.this().into()) else {
        throw(scope, "event subscriber.next: not a subscriber");
        return;
    };
    loop {
        if subscriber.trigger.is_cancelled() {
            rv.set(v8::null(scope).into());
            return;
        }
        match subscriber.rx.recv_timeout(Duration::from_millis(200)) {
            Ok(value) => {
                rv.set(make_json(scope, &value));
                return;
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                rv.set(v8::null(scope).into());
                return;
            }
        }
    }
}

fn cancel(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    if let Some(subscriber) = subscriber_of(scope, args.this().into()) {
        subscriber.trigger.cancel();
    }
}

/// Push-style sugar over a subscriber: spawns a background thread that
/// blocks on `rx` and forwards every delivered value to `callback` via a
/// queued `Job`, the same bridge `websocket.rs`'s reader thread uses.
fn on(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(topic) = arg_string(scope, &args, 0) else {
        throw(scope, "event.on(topic, fn): topic must be a string");
        return;
    };
    let Ok(callback): Result<v8::Local<v8::Function>, _> = args.get(1).try_into() else {
        throw(scope, "event.on(topic, fn): fn must be a function");
        return;
    };
    let callback_global = v8::Global::new(scope, callback);
    let state = worker_state(scope);
    let subscriber = register(&state, &[topic]);

    thread::spawn(move || loop {
        if subscriber.trigger.is_cancelled() {
            return;
        }
        match subscriber.rx.recv_timeout(Duration::from_millis(200)) {
            Ok(data) => {
                let trigger = subscriber.trigger.clone();
                let callback_global = callback_global.clone();
                let job: Job = Box::new(move |worker| {
                    let arg = worker.with_scope(|scope| v8::Global::new(scope, make_json(scope, &data)));
                    worker.invoke_callback(&callback_global, vec![arg]);
                });
                trigger.add_task(job);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_marks_subscriber_as_cancelled_so_emit_skips_it() {
        BUS.clear();
        let loop_: cube_core::event_loop::EventLoop<Job> = cube_core::event_loop::EventLoop::new();
        let trigger = loop_.new_trigger();
        let (tx, rx) = crossbeam_channel::unbounded();
        let subscriber = Arc::new(Subscriber { trigger, tx, rx });
        BUS.entry("topic".to_string()).or_default().push(subscriber.clone());
        assert!(subscriber.trigger.cancel());
        let live = BUS.get("topic").map(|v| v.iter().filter(|s| !s.trigger.is_cancelled()).count());
        assert_eq!(live, Some(0));
    }
}
