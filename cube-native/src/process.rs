// Copyright 2026 the Cube authors. MIT license.
//
// `$native("process")` (§4.G "process | exec/pexec against the host
// process"). Grounded in `internal/module/process.go`'s `ProcessClient`:
// `exec(command, ...params)` runs and waits synchronously, `pexec` runs
// on a goroutine and resolves a promise from the event loop's microtask
// queue — `t.AddMicroTask(func() { resolve(...); t.Cancel() })`, which we
// mirror exactly rather than following `fetch.rs`'s macrotask-based
// resolution, since the original is explicit that `resolve()` must run
// as a microtask.

use std::cell::RefCell;
use std::process::Command;
use std::rc::Rc;
use std::thread;

use cube_core::vm::{state_from_scope, Job, WorkerState};

use crate::support::{arg_string, make_bytes, set_method, throw};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "exec", exec);
    set_method(scope, obj, "pexec", pexec);
    obj.into()
}

fn command_args(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> Option<(String, Vec<String>)> {
    let command = arg_string(scope, args, 0)?;
    let params = (1..args.length()).filter_map(|i| arg_string(scope, args, i)).collect();
    Some((command, params))
}

fn run(command: &str, params: &[String]) -> std::io::Result<Vec<u8>> {
    Command::new(command).args(params).output().map(|output| output.stdout)
}

fn exec(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((command, params)) = command_args(scope, &args) else {
        throw(scope, "process.exec(command, ...params): command must be a string");
        return;
    };
    match run(&command, &params) {
        Ok(stdout) => rv.set(make_bytes(scope, &stdout)),
        Err(err) => throw(scope, &err.to_string()),
    }
}

fn pexec(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some((command, params)) = command_args(scope, &args) else {
        throw(scope, "process.pexec(command, ...params): command must be a string");
        return;
    };

    let resolver = v8::PromiseResolver::new(scope).expect("PromiseResolver::new");
    let promise = resolver.get_promise(scope);
    let resolver_global = v8::Global::new(scope, resolver);

    let state = state_from_scope(scope);
    let trigger = state.borrow().event_loop.new_trigger();

    thread::spawn(move || {
        let outcome = run(&command, &params).map_err(|e| e.to_string());
        let job: Job = Box::new(move |worker| {
            worker.with_scope(|scope| {
                let resolver = v8::Local::new(scope, &resolver_global);
                match outcome {
                    Ok(stdout) => {
                        let value = make_bytes(scope, &stdout);
                        resolver.resolve(scope, value);
                    }
                    Err(message) => {
                        let msg = v8::String::new(scope, &message).unwrap();
                        let exception = v8::Exception::error(scope, msg);
                        resolver.reject(scope, exception);
                    }
                }
            });
        });
        trigger.add_microtask(job);
        trigger.cancel();
    });

    rv.set(promise.into());
}
