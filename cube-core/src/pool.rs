// Copyright 2026 the Cube authors. MIT license.
//
// The VM pool (§4.D, §5 "Concurrency & resource model"). Grounded in
// `internal/workerpool.go`'s fixed-size pool of pre-created Workers
// handed out over a buffered channel, with the HTTP path doing a
// non-blocking receive (immediate 503 on exhaustion) and the
// daemon/crontab paths doing a blocking receive (§4.F.2/4.F.3 "wait for
// a Worker rather than fail").
//
// Because a `Worker` owns a `v8::OwnedIsolate` and is therefore confined
// to the OS thread it was created on, the pool does not hand out `Worker`
// values at all. It hands out a `WorkerHandle`: a `Send` descriptor (a
// per-worker job channel, a `v8::IsolateHandle`, and shared handles onto
// the Worker's event loop/defer list/interrupt reason) that lets any
// thread submit a `Job` to the Worker's home thread and, independently,
// force an interrupt that actually drains the Worker's defers from the
// calling thread (`WorkerHandle::force_interrupt`) instead of waiting for
// the Worker's own thread to notice.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::artifact::ArtifactStore;
use crate::context::{self, HttpOutcome, HttpRequestState, ServiceResponse};
use crate::error::{CubeError, CubeResult};
use crate::program_cache::ProgramCache;
use crate::registry::NativeRegistry;
use crate::vm::{drain_defer_list, DeferList, InterruptReason, Job};
use crate::worker::Worker;

/// Plain, `Send` description of an inbound HTTP request, built by the
/// dispatcher on whichever thread accepted the connection. Everything a
/// `HttpRequestState` needs, minus the `Rc<RefCell<..>>` wrapper — that
/// wrapper is only ever constructed on the Worker's own thread, since an
/// `Rc` crossing threads would be unsound (§3 "Run context").
pub struct HttpCall {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub route_vars: HashMap<String, String>,
}

#[derive(Clone)]
struct WorkerHandle {
    id: usize,
    job_tx: Sender<Job>,
    isolate_handle: v8::IsolateHandle,
    event_loop: crate::event_loop::EventLoop<Job>,
    defers: DeferList,
    interrupt_reason: InterruptReason,
}

impl WorkerHandle {
    /// Cross-thread equivalent of the (unreachable, `!Send`-confined)
    /// `Worker::interrupt`: records the reason, wakes the event loop,
    /// terminates the running script, and — the part plain
    /// `isolate_handle.terminate_execution()` alone does not get you —
    /// drains the Worker's pending defers right here, from whichever
    /// thread noticed the timeout/cancel. This is what actually unblocks
    /// a Worker parked inside a synchronous native call (§9): the call
    /// itself only returns once its own defer (closing a listener,
    /// rolling back a transaction) has run, and that defer can't wait for
    /// the Worker's own thread to get free.
    fn force_interrupt(&self, reason: &'static str) {
        *self.interrupt_reason.lock().unwrap() = Some(reason);
        self.event_loop.interrupt();
        self.isolate_handle.terminate_execution();
        drain_defer_list(&self.defers);
    }
}

pub struct VmPool {
    idle_tx: Sender<WorkerHandle>,
    idle_rx: Receiver<WorkerHandle>,
    size: usize,
}

impl VmPool {
    /// Spawns `size` dedicated worker threads, each owning exactly one
    /// `Worker` for its entire life (§5 "pool size is fixed at startup;
    /// Workers are created once and reused, never destroyed except on
    /// shutdown").
    pub fn new(
        size: usize,
        store: Arc<dyn ArtifactStore>,
        program_cache: Arc<ProgramCache>,
        natives: Arc<NativeRegistry>,
    ) -> Self {
        let (idle_tx, idle_rx) = bounded(size);
        for id in 0..size {
            let (job_tx, job_rx) = bounded::<Job>(1);
            let store = store.clone();
            let program_cache = program_cache.clone();
            let natives = natives.clone();
            let idle_tx2 = idle_tx.clone();
            thread::Builder::new()
                .name(format!("cube-worker-{id}"))
                .spawn(move || {
                    let mut worker = Worker::new(id, store, program_cache, natives);
                    let handle = WorkerHandle {
                        id,
                        job_tx,
                        isolate_handle: worker.isolate_handle(),
                        event_loop: worker.event_loop_handle(),
                        defers: worker.defers_handle(),
                        interrupt_reason: worker.interrupt_reason_handle(),
                    };
                    if idle_tx2.send(handle).is_err() {
                        return;
                    }
                    while let Ok(job) = job_rx.recv() {
                        job(&mut worker);
                    }
                })
                .expect("failed to spawn cube worker thread");
        }
        Self {
            idle_tx,
            idle_rx,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn idle_count(&self) -> usize {
        self.idle_rx.len()
    }

    /// §4.F.1: "acquire a Worker from the pool; if none is idle, respond
    /// 503 immediately." Never blocks.
    pub fn try_acquire(&self) -> Option<PoolTicket> {
        self.idle_rx.try_recv().ok().map(|handle| PoolTicket {
            handle: Some(handle),
            idle_tx: self.idle_tx.clone(),
        })
    }

    /// §4.F.2/4.F.3: daemon and crontab dispatch run at a fixed, much
    /// lower concurrency than inbound HTTP traffic and are expected to
    /// wait their turn for a Worker rather than fail outright.
    pub fn acquire_blocking(&self) -> CubeResult<PoolTicket> {
        self.idle_rx
            .recv()
            .map(|handle| PoolTicket {
                handle: Some(handle),
                idle_tx: self.idle_tx.clone(),
            })
            .map_err(|_| CubeError::ServiceUnavailable)
    }
}

/// An exclusively-held Worker (§3 "Ownership rules: a Worker is held by
/// at most one dispatcher at a time"). Dropping a ticket without calling
/// `run_entry` still returns the handle to the idle channel, so a ticket
/// acquired but never used (a request cancelled before dispatch) never
/// leaks a Worker out of the pool.
pub struct PoolTicket {
    handle: Option<WorkerHandle>,
    idle_tx: Sender<WorkerHandle>,
}

impl PoolTicket {
    pub fn worker_id(&self) -> usize {
        self.handle.as_ref().map(|h| h.id).unwrap_or(usize::MAX)
    }

    /// Runs `import_id`'s export as a function called with `args` on the
    /// held Worker. Blocks until the call completes, `timeout` elapses, or
    /// `cancel` fires first — the three races §4.F.1 describes for an
    /// HTTP-triggered run (a 60s ceiling and a client-disconnect watcher),
    /// and §4.F.2's "Daemon stopped" interrupt. `cancel_reason` is the
    /// fixed string callers want attached if `cancel` is the branch that
    /// fires (§4.F.2 "Daemon stopped" vs. §4.F.1's "client cancelled" —
    /// both race the same `WorkerHandle::force_interrupt` mechanism, only
    /// the reason text differs by caller). Daemon/crontab callers pass a
    /// timeout far
    /// longer than any expected run and (crontabs) a `cancel` that never
    /// fires.
    ///
    /// The Worker is reset (§4.D) and returned to the idle pool via
    /// `Drop` regardless of which branch completes first.
    pub fn run_entry(
        &mut self,
        import_id: &str,
        args: Vec<v8::Global<v8::Value>>,
        timeout: Duration,
        cancel: Receiver<()>,
        cancel_reason: &'static str,
    ) -> CubeResult<v8::Global<v8::Value>> {
        let handle = self.handle.as_ref().expect("ticket already consumed");
        let (result_tx, result_rx) = bounded(1);
        let import_id = import_id.to_string();
        let job: Job = Box::new(move |worker: &mut Worker| {
            let result = worker.run_entry(&import_id, args);
            worker.reset();
            let _ = result_tx.send(result);
        });
        if handle.job_tx.send(job).is_err() {
            return Err(CubeError::ServiceUnavailable);
        }

        let handle = handle.clone();
        crossbeam_channel::select! {
            recv(result_rx) -> result => result.map_err(|_| CubeError::ServiceUnavailable)?,
            recv(cancel) -> _ => {
                // §7 "Cancelled... same mechanics as Timeout, different
                // reason string": the reason this branch fired is the
                // authoritative outcome regardless of what the terminated
                // script's own completion value looks like (a V8
                // termination is not a catchable JS exception, so
                // `Worker::run_entry`'s own result here is meaningless).
                // `force_interrupt` drains the Worker's defers right here
                // so a blocked synchronous native call (e.g.
                // `socket.accept()`) actually unblocks instead of riding
                // out its own call. Still wait for the job to actually
                // land so the Worker is reset before this ticket drops.
                handle.force_interrupt(cancel_reason);
                let _ = result_rx.recv_timeout(Duration::from_secs(5));
                Err(CubeError::Cancelled(cancel_reason))
            },
            default(timeout) => {
                handle.force_interrupt("service executed timeout");
                let _ = result_rx.recv_timeout(Duration::from_secs(5));
                Err(CubeError::Timeout("service executed timeout"))
            },
        }
    }

    /// The HTTP-triggered variant of `run_entry` (§4.F.1 steps 7-10): the
    /// `ctx` argument a controller receives has to be built from inside the
    /// Job closure, on the Worker's own thread, because `ctx` ultimately
    /// wraps an `Rc<RefCell<HttpRequestState>>` which cannot be handed
    /// across the thread boundary pre-built. `call` carries everything the
    /// context needs in `Send` form; the response — including whatever
    /// `ctx.setHeader`/`ctx.status`/`ctx.write` left behind — comes back the
    /// same way a plain `run_entry` result does.
    pub fn run_http(
        &mut self,
        import_id: &str,
        call: HttpCall,
        timeout: Duration,
        cancel: Receiver<()>,
    ) -> CubeResult<HttpOutcome> {
        let handle = self.handle.as_ref().expect("ticket already consumed");
        let (result_tx, result_rx) = bounded(1);
        let import_id = import_id.to_string();
        let job: Job = Box::new(move |worker: &mut Worker| {
            let http_state = Rc::new(RefCell::new(HttpRequestState::new(
                call.method,
                call.path,
                call.headers,
                call.query,
                call.form,
                call.body,
                call.route_vars,
            )));
            worker.set_http_context(http_state.clone());

            let ctx_arg = worker.with_scope(|scope| {
                let ctx = context::build_service_context(scope);
                v8::Global::new(scope, v8::Local::<v8::Value>::from(ctx))
            });

            let run_result = worker.run_entry(&import_id, vec![ctx_arg]);
            let result = match run_result {
                Ok(value) => Ok(worker.with_scope(|scope| {
                    let local = v8::Local::new(scope, &value);
                    ServiceResponse::from_v8(scope, local)
                })),
                Err(err) => Err(err),
            };

            let outcome = {
                let http = http_state.borrow();
                HttpOutcome {
                    result,
                    status: http.response_status,
                    headers: http.response_headers.clone(),
                    streamed: http.streamed,
                    streamed_body: http.response_body.clone(),
                    push_hints: http.push_hints.clone(),
                }
            };
            worker.reset();
            let _ = result_tx.send(outcome);
        });
        if handle.job_tx.send(job).is_err() {
            return Err(CubeError::ServiceUnavailable);
        }

        let handle = handle.clone();
        crossbeam_channel::select! {
            recv(result_rx) -> outcome => outcome.map_err(|_| CubeError::ServiceUnavailable),
            recv(cancel) -> _ => {
                handle.force_interrupt("client cancelled");
                Ok(Self::overridden_outcome(
                    result_rx.recv_timeout(Duration::from_secs(5)).ok(),
                    CubeError::Cancelled("client cancelled"),
                ))
            },
            default(timeout) => {
                handle.force_interrupt("service executed timeout");
                Ok(Self::overridden_outcome(
                    result_rx.recv_timeout(Duration::from_secs(5)).ok(),
                    CubeError::Timeout("service executed timeout"),
                ))
            },
        }
    }

    /// §7/§9: once this ticket's own timeout or cancel watcher has fired,
    /// that reason is authoritative over whatever `worker.run_entry`
    /// itself observed — a V8 termination is not a catchable script
    /// exception, so the job's own `result` field is noise, not signal.
    /// What *is* signal from a completed job, even a terminated one: the
    /// response state the script had already written before it was cut
    /// off (`status`, `headers`, `streamed`, `streamed_body`) — §9 "Error
    /// surfaces when returnless=true: nothing further is written" depends
    /// on the dispatcher still knowing the run was `streamed` so it
    /// doesn't layer a JSON error body onto a response the script already
    /// took over.
    fn overridden_outcome(outcome: Option<HttpOutcome>, reason: CubeError) -> HttpOutcome {
        match outcome {
            Some(mut outcome) => {
                outcome.result = Err(reason);
                outcome
            }
            None => HttpOutcome {
                result: Err(reason),
                status: 200,
                headers: Vec::new(),
                streamed: false,
                streamed_body: Vec::new(),
                push_hints: Vec::new(),
            },
        }
    }
}

impl Drop for PoolTicket {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.idle_tx.send(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::SqliteArtifactStore;
    use crate::registry::NativeRegistry;

    /// `v8::V8::initialize` may run exactly once per process (§4.B
    /// rationale); every test in this module spins up real Workers, so
    /// they all funnel through this guard rather than each calling
    /// `init_v8_platform` directly.
    fn ensure_v8_initialized() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(crate::vm::init_v8_platform);
    }

    fn store_with_controller(name: &str, compiled: &str) -> Arc<dyn ArtifactStore> {
        let store = SqliteArtifactStore::in_memory().unwrap();
        {
            let conn = store.raw_connection();
            let conn = conn.lock();
            conn.execute(
                "insert into source (name, type, lang, content, compiled, active, method, url, cron, last_modified_date)
                 values (?1, 'controller', 'typescript', ?2, ?2, true, '', '', '', 0)",
                rusqlite::params![name, compiled],
            )
            .unwrap();
        }
        Arc::new(store)
    }

    fn bare_pool(store: Arc<dyn ArtifactStore>, size: usize) -> VmPool {
        ensure_v8_initialized();
        VmPool::new(size, store, Arc::new(ProgramCache::new()), Arc::new(NativeRegistry::new()))
    }

    /// §8 "for every Worker, at any instant, it is either idle or held by
    /// exactly one dispatcher". With a pool of size 1, a second
    /// `try_acquire` while the first ticket is still held must fail fast
    /// rather than block (§4.D "Acquire: non-blocking").
    #[test]
    fn try_acquire_exhausted_returns_none_until_released() {
        let store = store_with_controller("noop", "module.exports = function() { return 1; };");
        let pool = bare_pool(store, 1);

        let first = pool.try_acquire().expect("pool should have one idle worker");
        assert!(pool.try_acquire().is_none(), "second acquire must fail fast, not block");

        drop(first);
        std::thread::sleep(Duration::from_millis(50));
        assert!(pool.try_acquire().is_some(), "dropping a ticket returns the Worker to idle");
    }

    /// §8 scenario 4 at the pool layer (the HTTP dispatcher's 60s ceiling
    /// is too slow to exercise directly in a unit test): a synchronous,
    /// non-yielding script is torn down once its wall-clock budget
    /// expires, and `CubeError::Timeout` is what the caller observes.
    #[test]
    fn run_entry_times_out_on_infinite_loop() {
        let store = store_with_controller("spin", "module.exports = function() { while (true) {} };");
        let pool = bare_pool(store, 1);
        let mut ticket = pool.try_acquire().unwrap();
        let (_tx, cancel_rx) = bounded::<()>(1);

        let result = ticket.run_entry("./controller/spin", Vec::new(), Duration::from_millis(200), cancel_rx, "test cancelled");
        assert!(matches!(result, Err(CubeError::Timeout(_))), "expected a timeout, got {result:?}");
    }

    /// A cancel signal races the same way a client disconnect does
    /// (§4.F.1 step 5): it interrupts the still-running script and the
    /// Worker comes back as `Cancelled`, not `Timeout`.
    #[test]
    fn run_entry_cancelled_before_timeout() {
        let store = store_with_controller("spin", "module.exports = function() { while (true) {} };");
        let pool = bare_pool(store, 1);
        let mut ticket = pool.try_acquire().unwrap();
        let (cancel_tx, cancel_rx) = bounded::<()>(1);

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let _ = cancel_tx.send(());
        });

        let result = ticket.run_entry("./controller/spin", Vec::new(), Duration::from_secs(30), cancel_rx, "test cancelled");
        assert!(matches!(result, Err(CubeError::Cancelled(_))), "expected cancellation, got {result:?}");
    }

    /// §8 "require(id) called twice... re-runs on every call": a plain
    /// successful run returns the script's value and leaves the Worker
    /// reusable for the very next call on the same ticket's pool.
    #[test]
    fn run_entry_returns_script_value_and_worker_is_reusable() {
        let store = store_with_controller("answer", "module.exports = function() { return 42; };");
        let pool = bare_pool(store, 1);
        {
            let mut ticket = pool.try_acquire().unwrap();
            let (_tx, cancel_rx) = bounded::<()>(1);
            let result = ticket.run_entry("./controller/answer", Vec::new(), Duration::from_secs(5), cancel_rx, "test cancelled");
            assert!(result.is_ok());
        }
        // the ticket was dropped, returning the Worker to the idle channel
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn resolve_missing_controller_is_not_found() {
        let store = store_with_controller("answer", "module.exports = function() { return 1; };");
        let pool = bare_pool(store, 1);
        let mut ticket = pool.try_acquire().unwrap();
        let (_tx, cancel_rx) = bounded::<()>(1);
        let result = ticket.run_entry("./controller/missing", Vec::new(), Duration::from_secs(5), cancel_rx, "test cancelled");
        assert!(matches!(result, Err(CubeError::NotFound { .. })));
    }
}
