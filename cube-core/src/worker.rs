// Copyright 2026 the Cube authors. MIT license.
//
// The Worker (§3 "Worker", §4.D). Grounded in `internal/worker.go`'s
// `CreateWorker`/`Run`/`Interrupt`/`Reset`/`AddDefer`: one script engine
// instance per Worker, `require`/`$native` installed as globals once at
// construction, an entry function looked up through the linker and
// invoked on `Run`, defers drained LIFO on interrupt and reset. The
// teacher's analogue is `JsRuntime::new` installing its `Extension`
// tables once and `JsRuntime::execute_script`/`run_event_loop` driving a
// single call; we drive the same two-phase shape (call, then drain)
// directly against `v8` instead of through `deno_core`.
//
// A `Worker` is confined to the OS thread that calls `Worker::new` for
// its entire life — `v8::OwnedIsolate` is `!Send`. Cross-thread
// interrupts (`crate::pool::WorkerHandle::force_interrupt`) go through
// `v8::IsolateHandle::terminate_execution` plus the `Send`-safe
// `DeferList`/`InterruptReason` handles this file exposes
// (`defers_handle`, `interrupt_reason_handle`), since draining defers
// from the Worker's own thread alone would be too late for a run blocked
// inside a synchronous native call. Cross-thread task delivery goes
// through the `Job` channels inside `EventLoop`, never through the
// `Worker` value itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::artifact::ArtifactStore;
use crate::error::{CubeError, CubeResult};
use crate::linker;
use crate::program_cache::ProgramCache;
use crate::registry::NativeRegistry;
use crate::vm::{state_from_scope, throw_error, DeferList, InterruptReason, Job, WorkerState};

pub struct Worker {
    pub id: usize,
    isolate: v8::OwnedIsolate,
}

impl Worker {
    /// Grounded in `CreateWorker`: builds the isolate/context, installs
    /// `require`, `$native`, and every registered builtin exactly once,
    /// then stashes `WorkerState` in the isolate's slot so plain-fn-pointer
    /// callbacks can recover it (`state_from_scope`, `vm.rs`).
    pub fn new(
        id: usize,
        store: Arc<dyn ArtifactStore>,
        program_cache: Arc<ProgramCache>,
        natives: Arc<NativeRegistry>,
    ) -> Self {
        let mut isolate = v8::Isolate::new(v8::CreateParams::default());
        {
            let scope = &mut v8::HandleScope::new(&mut isolate);
            let context = v8::Context::new(scope, Default::default());
            let global_context = v8::Global::new(scope, context);

            let state = Rc::new(RefCell::new(WorkerState {
                id,
                context: global_context,
                event_loop: crate::event_loop::EventLoop::new(),
                defers: Arc::new(std::sync::Mutex::new(Vec::new())),
                interrupt_reason: Arc::new(std::sync::Mutex::new(None)),
                store,
                program_cache,
                natives: natives.clone(),
                http: None,
                timers: std::collections::HashMap::new(),
            }));
            scope.set_slot(state.clone());

            let scope = &mut v8::ContextScope::new(scope, context);
            install_globals(scope, &natives, &state);
        }
        Self { id, isolate }
    }

    fn state(&self) -> Rc<RefCell<WorkerState>> {
        self.isolate
            .get_slot::<Rc<RefCell<WorkerState>>>()
            .expect("WorkerState slot missing")
            .clone()
    }

    /// A `Send + Sync` handle usable from any thread to request that this
    /// Worker's currently-executing script stop at its next instruction
    /// (§4.E "VM-level interrupt").
    pub fn isolate_handle(&self) -> v8::IsolateHandle {
        self.isolate.thread_safe_handle()
    }

    /// A clone of this Worker's event loop, usable from any thread to push
    /// an interrupt token (§4.E) without needing `&mut Worker` — the
    /// isolate itself is confined to this Worker's own OS thread, but the
    /// loop's channels and counter are plain `Send` handles.
    pub fn event_loop_handle(&self) -> crate::event_loop::EventLoop<Job> {
        self.state().borrow().event_loop.clone()
    }

    /// A shared handle onto this Worker's pending-defer list, usable from
    /// any thread. This is what actually lets a dispatcher interrupt a
    /// Worker blocked inside a synchronous native call: see
    /// `crate::vm::drain_defer_list` and `VmPool`/`PoolTicket`, which call
    /// it directly from the thread that notices a timeout or cancel,
    /// rather than waiting for this Worker's own thread to notice.
    pub fn defers_handle(&self) -> DeferList {
        self.state().borrow().defers.clone()
    }

    /// A shared handle for recording the fixed reason a run was
    /// interrupted (§4.D), set by whichever thread detects the
    /// timeout/cancel and read back by `run_entry` once the blocked call
    /// finally returns.
    pub fn interrupt_reason_handle(&self) -> InterruptReason {
        self.state().borrow().interrupt_reason.clone()
    }

    pub fn add_defer(&mut self, f: impl FnOnce() + Send + 'static) {
        self.state().borrow_mut().add_defer(f);
    }

    fn drain_defers(&mut self) {
        self.state().borrow_mut().drain_defers();
    }

    /// §4.D "Reset": returns the Worker to a clean `idle` state between
    /// runs. Defers still pending are drained LIFO, the event loop's
    /// queues and outstanding count are zeroed, and any lingering
    /// interrupt reason is cleared so the next `run_entry` starts fresh.
    pub fn reset(&mut self) {
        let state = self.state();
        let mut state = state.borrow_mut();
        state.drain_defers();
        state.event_loop.reset();
        *state.interrupt_reason.lock().unwrap() = None;
        state.http = None;
        state.timers.clear();
    }

    /// Installs the per-run HTTP context (§3 "Run context"). Called by
    /// the HTTP dispatcher after acquiring a Worker and before
    /// `run_entry`; left untouched (`None`) for daemon and crontab runs.
    pub fn set_http_context(&mut self, http: Rc<RefCell<crate::context::HttpRequestState>>) {
        self.state().borrow_mut().http = Some(http);
    }

    /// §4.D "Run": resolves `import_id` through the linker, calls the
    /// resulting export as a function with `args`, then drains the event
    /// loop to completion (§4.E) before returning. This is the single
    /// entry point dispatchers use to run a controller, a daemon's entry
    /// function, or a crontab job — they differ only in which import id
    /// and arguments they pass (§4.F).
    pub fn run_entry(
        &mut self,
        import_id: &str,
        args: Vec<v8::Global<v8::Value>>,
    ) -> CubeResult<v8::Global<v8::Value>> {
        let state = self.state();
        *state.borrow().interrupt_reason.lock().unwrap() = None;

        let context = state.borrow().context.clone();
        let result = {
            let scope = &mut v8::HandleScope::new(&mut self.isolate);
            let context_local = v8::Local::new(scope, context);
            let scope = &mut v8::ContextScope::new(scope, context_local);
            let scope = &mut v8::TryCatch::new(scope);

            let call_result = (|| -> CubeResult<v8::Global<v8::Value>> {
                let exports = linker::require(scope, &state, import_id)?;
                let function: v8::Local<v8::Function> =
                    exports.try_into().map_err(|_| CubeError::ScriptException {
                        code: "1".to_string(),
                        message: format!("{import_id} does not export a callable entry"),
                    })?;
                let local_args: Vec<v8::Local<v8::Value>> =
                    args.iter().map(|g| v8::Local::new(scope, g)).collect();
                let undefined = v8::undefined(scope).into();
                let value = function.call(scope, undefined, &local_args);
                if let Some(exception) = scope.exception() {
                    let message = exception.to_rust_string_lossy(scope);
                    return Err(CubeError::ScriptException {
                        code: "1".to_string(),
                        message,
                    });
                }
                let value = value.ok_or_else(|| CubeError::ScriptException {
                    code: "1".to_string(),
                    message: format!("{import_id} produced no return value"),
                })?;
                Ok(v8::Global::new(scope, value))
            })();
            call_result
        };

        // §4.E's drain runs unconditionally, even if the entry function
        // itself threw: anything it scheduled before throwing (a
        // `setTimeout`, a microtask) is still owed a turn, exactly as
        // `eventloop.go`'s post-`main()` drain doesn't branch on `main`'s
        // own error.
        self.drain_loop();

        let reason = *state.borrow().interrupt_reason.lock().unwrap();
        if let Some(reason) = reason {
            return Err(CubeError::Cancelled(reason));
        }
        result
    }

    /// Opens a `HandleScope`/`ContextScope` pair against this Worker's
    /// context and runs `f` against it. Lets native capabilities outside
    /// `cube_core` (e.g. `fetch`'s promise settlement, `event`'s
    /// subscription callbacks) reach V8 from inside a queued `Job`
    /// without `cube_core` having to know their concrete result types.
    pub fn with_scope<R>(&mut self, f: impl FnOnce(&mut v8::HandleScope) -> R) -> R {
        let state = self.state();
        let context = state.borrow().context.clone();
        let scope = &mut v8::HandleScope::new(&mut self.isolate);
        let context_local = v8::Local::new(scope, context);
        let scope = &mut v8::ContextScope::new(scope, context_local);
        f(scope)
    }

    /// Calls a stored JS function with `args` in this Worker's context,
    /// logging (rather than propagating) a thrown exception. Used by
    /// timer callbacks, event-bus subscriptions, and other native
    /// capabilities that hand a `v8::Global<v8::Function>` to a
    /// background thread and need it invoked back on the Worker's own
    /// thread via a queued `Job` (§4.E "Triggers").
    pub fn invoke_callback(&mut self, callback: &v8::Global<v8::Function>, args: Vec<v8::Global<v8::Value>>) {
        let state = self.state();
        let context = state.borrow().context.clone();
        let scope = &mut v8::HandleScope::new(&mut self.isolate);
        let context_local = v8::Local::new(scope, context);
        let scope = &mut v8::ContextScope::new(scope, context_local);
        let scope = &mut v8::TryCatch::new(scope);
        let func = v8::Local::new(scope, callback);
        let local_args: Vec<v8::Local<v8::Value>> = args.iter().map(|g| v8::Local::new(scope, g)).collect();
        let undefined = v8::undefined(scope).into();
        func.call(scope, undefined, &local_args);
        if let Some(exception) = scope.exception() {
            let message = exception.to_rust_string_lossy(scope);
            tracing::warn!(worker = self.id, %message, "callback threw");
        }
    }

    /// §4.E steps 2 onward: runs every queued job, microtasks first, until
    /// the outstanding-task counter reaches zero or an interrupt arrives.
    /// Jobs run with `&mut self` so they can re-enter the isolate (a timer
    /// firing, a completed async native call resuming script code).
    ///
    /// Takes a clone of the event loop handle rather than holding
    /// `WorkerState` borrowed for the whole drain: `run_job` below calls
    /// back into `self` (`invoke_callback`, which borrows `WorkerState`
    /// again to reach the context), so a borrow held across that
    /// reentrant call would panic. `EventLoop::clone` is cheap (channel
    /// handles and a shared counter), so this costs nothing but a few
    /// `Arc`/`Sender` bumps.
    fn drain_loop(&mut self) {
        let mut event_loop = self.state().borrow().event_loop.clone();
        event_loop.drain(|job: Job| job(self));
    }
}

fn install_globals(scope: &mut v8::HandleScope, natives: &NativeRegistry, state: &Rc<RefCell<WorkerState>>) {
    let context = scope.get_current_context();
    let global = context.global(scope);
    set_function(scope, global, "require", require_callback);
    set_function(scope, global, "$native", native_callback);
    for (_name, installer) in natives.builtins() {
        installer(scope, global, state);
    }
}

fn set_function(
    scope: &mut v8::HandleScope,
    target: v8::Local<v8::Object>,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) {
    let key = v8::String::new(scope, name).unwrap();
    let function = v8::Function::new(scope, callback).unwrap();
    target.set(scope, key.into(), function.into());
}

/// `require(id)` native binding (§4.C). Delegates entirely to
/// `linker::require`; this wrapper only adapts the V8 calling convention
/// and turns a `CubeError` into a thrown script exception.
fn require_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let state = state_from_scope(scope);
    let id = match args.get(0).to_string(scope) {
        Some(s) => s.to_rust_string_lossy(scope),
        None => {
            throw_error(scope, "require: module id must be a string");
            return;
        }
    };
    match linker::require(scope, &state, &id) {
        Ok(value) => rv.set(value),
        Err(err) => {
            let (_, message) = err.envelope();
            throw_error(scope, &message);
        }
    }
}

/// `$native(name)` binding (§4.G "Modules"): synchronous lookup in the
/// process-wide registry, one call per script-side reference — no
/// caching here, capability implementations that want singleton
/// behaviour (lock tables, pipe registries) own that caching themselves.
fn native_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let state = state_from_scope(scope);
    let name = match args.get(0).to_string(scope) {
        Some(s) => s.to_rust_string_lossy(scope),
        None => {
            throw_error(scope, "$native: module name must be a string");
            return;
        }
    };
    let factory = {
        let borrowed = state.borrow();
        borrowed.natives.lookup_module(&name)
    };
    match factory {
        Some(factory) => {
            let value = factory(scope, &state);
            rv.set(value);
        }
        None => throw_error(scope, &format!("native module not found: {name}")),
    }
}
