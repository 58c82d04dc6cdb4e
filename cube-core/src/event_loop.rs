// Copyright 2026 the Cube authors. MIT license.
//
// The per-Worker event loop (§4.E). Grounded in
// `internal/builtin/eventloop.go`'s `EventLoop`/`EventTaskTrigger`/
// `Timeout`/`Interval` types: a macrotask channel, a microtask channel, an
// outstanding-work counter, and a capacity-1 interrupt channel. `count` and
// `cancelled` are atomics rather than the original's plain `int`/`bool`
// fields because a trigger and the jobs it schedules may be constructed on
// one thread (a background timer, an async native capability) and consumed
// on the Worker's own thread — see `cube_core::worker` for how `Job`s
// cross that boundary.
//
// One behavioural firming-up over the original: §9's open question notes
// the source's Go `select` does not actually guarantee microtasks run
// before macrotasks when both are ready (Go picks pseudo-randomly among
// ready cases); §8 states the invariant as a hard property, so `drain`
// below checks the microtask channel to exhaustion before ever pulling a
// macrotask, not just listing it first in a `select`.

use crossbeam_channel::{Select, Sender, TryRecvError};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const QUEUE_CAPACITY: usize = 10;

pub struct EventLoop<J> {
    tasks_tx: Sender<J>,
    tasks_rx: crossbeam_channel::Receiver<J>,
    micro_tx: Sender<J>,
    micro_rx: crossbeam_channel::Receiver<J>,
    interrupt_tx: Sender<()>,
    interrupt_rx: crossbeam_channel::Receiver<()>,
    count: Arc<AtomicI64>,
}

impl<J> EventLoop<J> {
    pub fn new() -> Self {
        let (tasks_tx, tasks_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let (micro_tx, micro_rx) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
        Self {
            tasks_tx,
            tasks_rx,
            micro_tx,
            micro_rx,
            interrupt_tx,
            interrupt_rx,
            count: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn outstanding(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// One unit of outstanding async work (§3 "Event-task trigger").
    pub fn new_trigger(&self) -> EventTaskTrigger<J> {
        self.count.fetch_add(1, Ordering::SeqCst);
        EventTaskTrigger {
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            count: self.count.clone(),
            tasks_tx: self.tasks_tx.clone(),
            micro_tx: self.micro_tx.clone(),
        }
    }

    /// Pushes an interrupt token, de-duplicated per §4.E ("must be
    /// de-duplicated, channel capacity 1, skip push if already full").
    pub fn interrupt(&self) {
        let _ = self.interrupt_tx.try_send(());
    }

    /// Runs `run_job` for every queued job, in priority order (microtasks
    /// exhausted before any macrotask), until `count` reaches zero or an
    /// interrupt token arrives. The synchronous body that produced the
    /// initial task count has already run by the time `drain` is called
    /// (§4.E step 1 happens in `Worker::run`, outside the loop).
    pub fn drain(&mut self, mut run_job: impl FnMut(J)) {
        loop {
            if self.interrupt_rx.try_recv().is_ok() {
                return;
            }
            if self.outstanding() <= 0 {
                return;
            }
            match self.micro_rx.try_recv() {
                Ok(job) => {
                    run_job(job);
                    continue;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return,
            }

            // No microtask is immediately ready: block on whichever of
            // {interrupt, microtask, macrotask} becomes ready next.
            let mut select = Select::new();
            let interrupt_idx = select.recv(&self.interrupt_rx);
            let micro_idx = select.recv(&self.micro_rx);
            let tasks_idx = select.recv(&self.tasks_rx);
            let ready = select.ready_timeout(Duration::from_secs(60));
            let ready = match ready {
                Ok(idx) => idx,
                Err(_) => continue, // re-check count/interrupt on timeout
            };

            if ready == interrupt_idx {
                if self.interrupt_rx.try_recv().is_ok() {
                    return;
                }
            } else if ready == micro_idx {
                if let Ok(job) = self.micro_rx.try_recv() {
                    run_job(job);
                }
            } else if ready == tasks_idx {
                if let Ok(job) = self.tasks_rx.try_recv() {
                    run_job(job);
                }
            }
        }
    }

    /// Zeroes `count` and drains both task channels and the interrupt
    /// channel (§4.E "Reset"). Precondition: no task is currently
    /// executing — the caller (the VM pool, on release) holds the Worker
    /// exclusively at this point.
    pub fn reset(&mut self) {
        self.count.store(0, Ordering::SeqCst);
        while self.tasks_rx.try_recv().is_ok() {}
        while self.micro_rx.try_recv().is_ok() {}
        while self.interrupt_rx.try_recv().is_ok() {}
    }
}

impl<J> Default for EventLoop<J> {
    fn default() -> Self {
        Self::new()
    }
}

/// Manual `Clone` (not `#[derive]`, which would add a spurious `J: Clone`
/// bound): every field is either a channel handle or an `Arc`, so a clone
/// is just another handle onto the same queues and the same outstanding-
/// work counter, never an independent copy. This is what lets
/// `Worker::drain_loop` take the event loop out of `WorkerState` by value
/// for the duration of `drain` instead of holding the state `RefCell`
/// borrowed while jobs run (§4.E).
impl<J> Clone for EventLoop<J> {
    fn clone(&self) -> Self {
        Self {
            tasks_tx: self.tasks_tx.clone(),
            tasks_rx: self.tasks_rx.clone(),
            micro_tx: self.micro_tx.clone(),
            micro_rx: self.micro_rx.clone(),
            interrupt_tx: self.interrupt_tx.clone(),
            interrupt_rx: self.interrupt_rx.clone(),
            count: self.count.clone(),
        }
    }
}

/// A handle that owns one unit of the loop's outstanding-work counter and
/// lets async code enqueue follow-up work (§3 "Event-task trigger",
/// §4.E "Triggers"). Clonable and `Send` so native capabilities can hand
/// it to a background thread/task.
#[derive(Clone)]
pub struct EventTaskTrigger<J> {
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    count: Arc<AtomicI64>,
    tasks_tx: Sender<J>,
    micro_tx: Sender<J>,
}

impl<J> EventTaskTrigger<J> {
    pub fn add_task(&self, job: J) {
        let _ = self.tasks_tx.send(job);
    }

    pub fn add_microtask(&self, job: J) {
        let _ = self.micro_tx.send(job);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Idempotent; only the first cancel decrements `count` (§3 "Cancel is
    /// idempotent; only the first cancel decrements the counter").
    pub fn cancel(&self) -> bool {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.count.fetch_sub(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_increments_and_cancel_decrements_once() {
        let loop_: EventLoop<()> = EventLoop::new();
        let trigger = loop_.new_trigger();
        assert_eq!(loop_.outstanding(), 1);
        assert!(trigger.cancel());
        assert_eq!(loop_.outstanding(), 0);
        assert!(!trigger.cancel());
        assert_eq!(loop_.outstanding(), 0);
    }

    #[test]
    fn drain_runs_microtasks_before_macrotasks() {
        let mut loop_: EventLoop<u32> = EventLoop::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let macro_trigger = loop_.new_trigger();
        let micro_trigger = loop_.new_trigger();
        macro_trigger.add_task(1);
        micro_trigger.add_microtask(2);

        let order_clone = order.clone();
        loop_.drain(move |job| {
            order_clone.lock().push(job);
        });

        assert_eq!(*order.lock(), vec![2, 1]);
    }

    #[test]
    fn interrupt_stops_drain_immediately() {
        let mut loop_: EventLoop<u32> = EventLoop::new();
        let trigger = loop_.new_trigger();
        trigger.add_task(1);
        loop_.interrupt();
        let mut ran = false;
        loop_.drain(|_| ran = true);
        assert!(!ran);
    }

    #[test]
    fn interrupt_is_deduplicated() {
        let loop_: EventLoop<()> = EventLoop::new();
        loop_.interrupt();
        loop_.interrupt();
        assert!(loop_.interrupt_rx.len() <= 1);
    }

    #[test]
    fn reset_clears_queues_and_count() {
        let mut loop_: EventLoop<u32> = EventLoop::new();
        let trigger = loop_.new_trigger();
        trigger.add_task(1);
        loop_.interrupt();
        loop_.reset();
        assert_eq!(loop_.outstanding(), 0);
        assert!(loop_.tasks_rx.try_recv().is_err());
        assert!(loop_.interrupt_rx.try_recv().is_err());
    }
}
