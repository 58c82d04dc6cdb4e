// Copyright 2026 the Cube authors. MIT license.
//
// `$native("lock")` (§4.G "lock | named mutex, auto-released on worker
// defer"). Grounded in `internal/module/lock.go`'s `LockCache`/
// `LockClient`: a process-wide map from name to mutex, a millisecond
// busy-loop `Lock(timeout)` that polls `tryLock` once per millisecond,
// and an `AddDefer` registered at acquisition time — not at lock-success
// time — so the handle returned to script always carries its own
// teardown regardless of whether it ever actually locks.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use cube_core::vm::WorkerState;

use crate::support::{arg_i64, arg_string, set_method, throw, worker_state};

struct LockClient {
    locked: AtomicBool,
}

static LOCKS: Lazy<DashMap<String, Arc<LockClient>>> = Lazy::new(DashMap::new);

fn client_for(name: &str) -> Arc<LockClient> {
    LOCKS
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(LockClient { locked: AtomicBool::new(false) }))
        .clone()
}

impl LockClient {
    fn try_lock(&self) -> bool {
        self.locked.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let function = v8::Function::new(scope, construct).unwrap();
    function.into()
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(name) = arg_string(scope, &args, 0) else {
        throw(scope, "lock(name): name must be a string");
        return;
    };
    let client = client_for(&name);

    {
        let client = client.clone();
        worker_state(scope).borrow_mut().add_defer(move || client.unlock());
    }

    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(client) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__lock").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "lock", lock);
    set_method(scope, obj, "unlock", unlock);
    rv.set(obj.into());
}

fn client_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<LockClient>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__lock")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const LockClient;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

/// `lock.lock(timeoutMs)`: polls once per millisecond up to `timeoutMs`
/// (§5's translation of the original's per-millisecond `tryLock` spin),
/// throwing a timeout error and releasing on failure exactly as
/// `LockClient.Lock` does.
fn lock(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(client) = client_of(scope, args.this().into()) else {
        throw(scope, "lock.lock: not a lock");
        return;
    };
    let timeout = arg_i64(scope, &args, 0).unwrap_or(0).max(0);
    for _ in 0..timeout {
        if client.try_lock() {
            return;
        }
        thread::sleep(Duration::from_millis(1));
    }
    client.unlock();
    throw(scope, "acquire lock timeout");
}

fn unlock(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    if let Some(client) = client_of(scope, args.this().into()) {
        client.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_try_lock_fails_while_held() {
        let client = Arc::new(LockClient { locked: AtomicBool::new(false) });
        assert!(client.try_lock());
        assert!(!client.try_lock());
        client.unlock();
        assert!(client.try_lock());
    }
}
