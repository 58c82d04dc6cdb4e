// Copyright 2026 the Cube authors. MIT license.
//
// `setTimeout`/`clearTimeout`/`setInterval`/`clearInterval` (§4.E
// "Triggers"). Grounded in `internal/builtin/eventloop.go`'s `Timeout`/
// `Interval` types: a `Timeout` is a real-time timer that, on fire,
// `addTask`s the callback wrapped to cancel its trigger afterwards; an
// `Interval` is a ticker goroutine that `addTask`s on every tick without
// cancelling, and whose `clearInterval` closes a stop channel and cancels
// the trigger once. We use a plain OS thread standing in for each
// timer/ticker goroutine and an `AtomicBool` standing in for the Go stop
// channel.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cube_core::vm::{state_from_scope, Job, TimerHandle, WorkerState};

use crate::support::set_method;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    set_method(scope, global, "setTimeout", set_timeout);
    set_method(scope, global, "clearTimeout", clear_timer);
    set_method(scope, global, "setInterval", set_interval);
    set_method(scope, global, "clearInterval", clear_timer);
}

fn callback_args(args: &v8::FunctionCallbackArguments, scope: &mut v8::HandleScope, from: i32) -> Vec<v8::Global<v8::Value>> {
    (from..args.length()).map(|i| v8::Global::new(scope, args.get(i))).collect()
}

fn delay_ms(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> u64 {
    args.get(1).number_value(scope).map(|n| n.max(0.0) as u64).unwrap_or(0)
}

fn set_timeout(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Ok(callback): Result<v8::Local<v8::Function>, _> = args.get(0).try_into() else {
        cube_core::vm::throw_error(scope, "setTimeout(fn, ms): fn must be a function");
        return;
    };
    let ms = delay_ms(scope, &args);
    let extra_args = callback_args(&args, scope, 2);
    let callback_global = v8::Global::new(scope, callback);

    let state = state_from_scope(scope);
    let trigger = state.borrow().event_loop.new_trigger();
    let stop = Arc::new(AtomicBool::new(false));
    let handle_id = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    state.borrow_mut().timers.insert(
        handle_id,
        TimerHandle {
            trigger: trigger.clone(),
            stop: stop.clone(),
        },
    );

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(ms));
        if stop.load(Ordering::SeqCst) || trigger.is_cancelled() {
            return;
        }
        let trigger2 = trigger.clone();
        let job: Job = Box::new(move |worker| {
            if !trigger.is_cancelled() {
                worker.invoke_callback(&callback_global, extra_args.clone());
            }
            trigger.cancel();
        });
        trigger2.add_task(job);
    });

    rv.set(v8::Number::new(scope, handle_id as f64).into());
}

fn set_interval(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Ok(callback): Result<v8::Local<v8::Function>, _> = args.get(0).try_into() else {
        cube_core::vm::throw_error(scope, "setInterval(fn, ms): fn must be a function");
        return;
    };
    let ms = delay_ms(scope, &args).max(1);
    let extra_args = callback_args(&args, scope, 2);
    let callback_global = v8::Global::new(scope, callback);

    let state = state_from_scope(scope);
    let trigger = state.borrow().event_loop.new_trigger();
    let stop = Arc::new(AtomicBool::new(false));
    let handle_id = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    state.borrow_mut().timers.insert(
        handle_id,
        TimerHandle {
            trigger: trigger.clone(),
            stop: stop.clone(),
        },
    );

    thread::spawn(move || loop {
        thread::sleep(Duration::from_millis(ms));
        if stop.load(Ordering::SeqCst) || trigger.is_cancelled() {
            return;
        }
        let callback_global = callback_global.clone();
        let extra_args = extra_args.clone();
        let job: Job = Box::new(move |worker| {
            worker.invoke_callback(&callback_global, extra_args);
        });
        trigger.add_task(job);
    });

    rv.set(v8::Number::new(scope, handle_id as f64).into());
}

/// Shared by `clearTimeout`/`clearInterval`: both stop the background
/// thread and cancel the trigger exactly once (§4.E, §8 "clearTimeout(...)
/// f is never invoked and count net-change is zero"). A handle id with no
/// matching entry (already fired, already cleared, or from a different
/// Worker generation after reset) is a silent no-op.
fn clear_timer(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(handle_id) = args.get(0).number_value(scope) else {
        return;
    };
    let handle_id = handle_id as u64;
    let state = state_from_scope(scope);
    if let Some(handle) = state.borrow_mut().timers.remove(&handle_id) {
        handle.stop.store(true, Ordering::SeqCst);
        handle.trigger.cancel();
    }
}
