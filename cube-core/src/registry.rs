// Copyright 2026 the Cube authors. MIT license.
//
// The native-capability registry (§4.G). Grounded in
// `internal/builtin/builtin.go` (`var Builtins = make(map[string]func(worker
// Worker) interface{})`) and `internal/module/module.go` (`var Factories =
// make(map[string]func(worker Worker, db Db) interface{})`). The teacher's
// equivalent is its `Extension`/op-registration mechanism (`libs/ops`,
// every `ext/*` crate) — a fixed table of named capabilities assembled at
// `JsRuntime` construction time and looked up by the runtime as scripts
// reference them.
//
// `cube_core` owns only the registration *mechanism*; concrete capability
// implementations (base64, crypto, db, ...) live in the `cube_native`
// crate and are registered into this table by `cube-cli` at startup, the
// same way `cube-cli`'s binary assembles deno's extensions into a
// `JsRuntime`.
//
// Callbacks are plain function pointers, not closures: V8 embedder
// callbacks are C-ABI function pointers with no capture slot, so any state
// a builtin or native module needs is recovered from the isolate's slot
// storage (`WorkerState`, see `vm.rs`) rather than captured at
// registration time. This mirrors how `deno_core`'s generated op
// trampolines reach back into `OpState` instead of closing over anything.

use crate::vm::WorkerState;
use std::cell::RefCell;
use std::rc::Rc;

/// Runs once per Worker at construction, installing a global into that
/// Worker's isolate (§4.G "Builtins"). Receives the global object so it can
/// `Set` whatever name(s) it owns.
pub type BuiltinInstaller =
    fn(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, state: &Rc<RefCell<WorkerState>>);

/// Produces the value returned by `$native(name)` (§4.G "Modules"). Called
/// synchronously, once per script-side lookup — native modules that want
/// worker-scoped singleton behaviour (lock, pipe, cache) arrange their own
/// caching the way `internal/module/lock.go`'s `LockCache` does, keyed
/// off process-wide or worker-local state reached through `WorkerState`.
pub type NativeFactory =
    for<'s> fn(scope: &mut v8::HandleScope<'s>, state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value>;

#[derive(Default)]
pub struct NativeRegistry {
    builtins: Vec<(&'static str, BuiltinInstaller)>,
    factories: std::collections::HashMap<&'static str, NativeFactory>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_builtin(&mut self, name: &'static str, installer: BuiltinInstaller) {
        self.builtins.push((name, installer));
    }

    pub fn register_module(&mut self, name: &'static str, factory: NativeFactory) {
        self.factories.insert(name, factory);
    }

    pub fn builtins(&self) -> &[(&'static str, BuiltinInstaller)] {
        &self.builtins
    }

    pub fn lookup_module(&self, name: &str) -> Option<NativeFactory> {
        self.factories.get(name).copied()
    }
}
