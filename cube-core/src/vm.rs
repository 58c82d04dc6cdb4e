// Copyright 2026 the Cube authors. MIT license.
//
// Low-level isolate/context plumbing shared by `worker.rs` and
// `linker.rs`. Grounded in `internal/worker.go`'s `CreateWorker`: one
// `goja.Runtime` per Worker, `require`/`$native`/`exports` installed as
// globals, builtins installed from a table. The teacher embeds the same
// engine (`v8`) one layer lower than its own `deno_core::JsRuntime`; we sit
// at that lower layer directly so `require` can stay synchronous per
// §4.C, which `deno_core`'s async ES module graph does not offer.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::artifact::ArtifactStore;
use crate::event_loop::EventLoop;
use crate::program_cache::ProgramCache;
use crate::registry::NativeRegistry;

/// The Worker's pending-defer list (§3 "Worker", §4.G "Defers"), shared
/// behind an `Arc<Mutex<_>>` rather than owned outright by `WorkerState`
/// so it can be drained from a thread other than the one running the
/// Worker's isolate. A Worker blocked inside a synchronous native call
/// (e.g. `socket.accept()`) cannot service its own cancellation — the
/// thread that detects the timeout/cancel has to be able to run the
/// defers itself to have any chance of unblocking it (§9 "defers...
/// possibly mid-operation, to *cause* termination").
pub type DeferList = Arc<Mutex<Vec<Box<dyn FnOnce() + Send>>>>;

/// Pops and runs every queued defer, LIFO (§4.G), from whichever thread
/// calls it. Safe to call from the Worker's own thread (`Worker::reset`)
/// or from a dispatcher thread racing a cancel/timeout against a blocked
/// synchronous call on the Worker's thread; the two can even overlap
/// harmlessly since each defer is popped and invoked outside the lock,
/// never twice (the `Vec` only ever shrinks).
pub fn drain_defer_list(defers: &DeferList) {
    loop {
        let next = defers.lock().unwrap().pop();
        match next {
            Some(defer) => defer(),
            None => break,
        }
    }
}

/// The fixed reason string attached to an in-flight interrupt (§4.E
/// "interrupt"), shared the same way `DeferList` is so the cancelling
/// thread can record it without needing `&mut Worker`. Reasons are always
/// `&'static str`s the caller already owns (`"Daemon stopped"`, `"service
/// executed timeout"`, ...) so this never allocates.
pub type InterruptReason = Arc<Mutex<Option<&'static str>>>;

/// A boxed unit of follow-up work queued on a Worker's event loop (§4.E).
/// Constructed on whichever thread schedules it (a timer, an async native
/// capability) and always executed back on the Worker's own thread, which
/// is why it must be `Send` even though the `Worker` it runs against is
/// not.
pub type Job = Box<dyn FnOnce(&mut crate::worker::Worker) + Send>;

/// Everything a native callback needs that isn't directly reachable
/// through `v8::HandleScope`. Stored once per Worker in an isolate slot
/// (`isolate.set_slot(Rc<RefCell<WorkerState>>)`) since V8 function
/// callbacks are plain function pointers with no capture environment —
/// this is the same role `deno_core::OpState` plays for op trampolines.
pub struct WorkerState {
    pub id: usize,
    pub context: v8::Global<v8::Context>,
    pub event_loop: EventLoop<Job>,
    pub defers: DeferList,
    pub interrupt_reason: InterruptReason,
    pub store: Arc<dyn ArtifactStore>,
    pub program_cache: Arc<ProgramCache>,
    pub natives: Arc<NativeRegistry>,
    /// Set by the HTTP dispatcher immediately before `Worker::run_entry`
    /// for a controller call, cleared again by `Worker::reset`. Daemon and
    /// crontab runs (§3 "Run context: daemon and crontab runs have no
    /// context") leave this `None` for their whole run, which is exactly
    /// what lets `cube-native`'s `ctx`-dependent natives detect a
    /// context-less run and throw instead of silently no-op'ing.
    pub http: Option<Rc<RefCell<crate::context::HttpRequestState>>>,
    /// Live `setTimeout`/`setInterval` handles keyed by the numeric id
    /// returned to script, so `clearTimeout`/`clearInterval` can reach the
    /// matching `EventTaskTrigger` (§4.E "Triggers"). Cleared wholesale by
    /// `Worker::reset`; entries left behind by a still-sleeping background
    /// timer thread are harmless (§9 "known limitation" class of leakage),
    /// since the thread only touches its own cloned trigger/stop flag.
    pub timers: std::collections::HashMap<u64, TimerHandle>,
}

/// What `clearTimeout`/`clearInterval` need to stop a pending timer
/// (§4.E): the trigger to cancel (decrements `count` exactly once) and,
/// for intervals, a stop flag the ticking thread polls between ticks.
#[derive(Clone)]
pub struct TimerHandle {
    pub trigger: crate::event_loop::EventTaskTrigger<Job>,
    pub stop: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl WorkerState {
    pub fn add_defer(&mut self, f: impl FnOnce() + Send + 'static) {
        self.defers.lock().unwrap().push(Box::new(f));
    }

    /// LIFO drain (§4.G "Defers run in LIFO order on Worker reset and on
    /// interrupt").
    pub fn drain_defers(&mut self) {
        drain_defer_list(&self.defers);
    }
}

pub fn state_from_scope(scope: &mut v8::HandleScope) -> Rc<RefCell<WorkerState>> {
    scope
        .get_slot::<Rc<RefCell<WorkerState>>>()
        .expect("WorkerState slot missing")
        .clone()
}

/// Runs `once` is ensured by the caller — `v8::V8::initialize_platform` and
/// `v8::V8::initialize` must be called exactly once per process
/// (`cube-cli`'s `main` does this before constructing the pool, the same
/// point the teacher's own `main.rs` initializes its V8 platform).
pub fn init_v8_platform() {
    let platform = v8::new_default_platform(0, false).make_shared();
    v8::V8::initialize_platform(platform);
    v8::V8::initialize();
}

/// Throws a plain `Error` with `message` in the current scope. Used by
/// native-callback glue that needs to surface a Rust error as a script
/// exception (§7 "ScriptException").
pub fn throw_error(scope: &mut v8::HandleScope, message: &str) {
    let msg = v8::String::new(scope, message).unwrap();
    let exception = v8::Exception::error(scope, msg);
    scope.throw_exception(exception);
}
