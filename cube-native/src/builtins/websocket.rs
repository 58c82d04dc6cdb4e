// Copyright 2026 the Cube authors. MIT license.
//
// `WebSocket` global (§4.G builtins table; §D "WebSocket upgrade and
// chunked-flush returnless paths" names the server side, this is the
// client). Grounded in `internal/builtin/websocket.go`'s thin wrapper
// around `gorilla/websocket.Dial`: connect, `send`, `onmessage`, `close`.
// We reuse `tokio_tungstenite`'s re-exported sync `tungstenite::connect`
// rather than pulling in a second WebSocket crate, and bridge inbound
// frames to the owning Worker's event loop the same way `timers.rs`
// bridges a background thread's tick to a queued `Job`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio_tungstenite::tungstenite::{self, Message};

use cube_core::vm::{state_from_scope, Job, WorkerState};

use crate::support::{arg_string, make_string, set_method, throw};

type Socket = tungstenite::WebSocket<tungstenite::stream::MaybeTlsStream<std::net::TcpStream>>;

/// Per-connection state kept alive for as long as the script-visible
/// object is reachable. `Arc::into_raw`'d into a `v8::External` on the
/// object at construction time and never reclaimed while the Worker
/// lives — an accepted per-connection leak, same class as §9's "known
/// limitation" global leakage the spec already tolerates for Worker
/// reuse.
struct SocketState {
    sink: Mutex<Socket>,
    closed: AtomicBool,
    on_message: Mutex<Option<v8::Global<v8::Function>>>,
}

pub fn install(scope: &mut v8::HandleScope, global: v8::Local<v8::Object>, _state: &Rc<RefCell<WorkerState>>) {
    let function = v8::Function::new(scope, construct).unwrap();
    let key = v8::String::new(scope, "WebSocket").unwrap();
    global.set(scope, key.into(), function.into());
}

fn construct(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(url) = arg_string(scope, &args, 0) else {
        throw(scope, "new WebSocket(url): url must be a string");
        return;
    };
    let (socket, _response) = match tungstenite::connect(url) {
        Ok(pair) => pair,
        Err(err) => {
            throw(scope, &format!("WebSocket connect failed: {err}"));
            return;
        }
    };

    let inner = Arc::new(SocketState {
        sink: Mutex::new(socket),
        closed: AtomicBool::new(false),
        on_message: Mutex::new(None),
    });

    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(inner.clone()) as *mut std::ffi::c_void);
    let slot_key = v8::String::new(scope, "__socket").unwrap();
    obj.set(scope, slot_key.into(), external.into());
    set_method(scope, obj, "send", send);
    set_method(scope, obj, "close", close);
    set_method(scope, obj, "onmessage", on_message);

    spawn_reader(state_from_scope(scope), inner);

    rv.set(obj.into());
}

/// One background reader thread per connection: blocks on the socket's
/// own `read()` (§5 "a long socket.read blocks the Worker entirely" does
/// not apply here — the read happens off the Worker thread precisely so
/// an `onmessage` callback can be delivered asynchronously) and forwards
/// every inbound text frame to the registered callback via a queued
/// `Job`, the same bridge `timers.rs` uses.
fn spawn_reader(state: Rc<RefCell<WorkerState>>, inner: Arc<SocketState>) {
    let trigger = state.borrow().event_loop.new_trigger();
    thread::spawn(move || loop {
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let message = inner.sink.lock().unwrap().read();
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => {
                inner.closed.store(true, Ordering::SeqCst);
                return;
            }
            Ok(_) => continue,
        };
        let inner2 = inner.clone();
        let job: Job = Box::new(move |worker| {
            let callback = inner2.on_message.lock().unwrap().clone();
            if let Some(callback) = callback {
                let arg = worker.with_scope(|scope| v8::Global::new(scope, make_string(scope, &text)));
                worker.invoke_callback(&callback, vec![arg]);
            }
        });
        trigger.add_task(job);
    });
}

fn inner_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<SocketState>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__socket")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const SocketState;
    // SAFETY: the `Arc` was leaked into this external when the object was
    // constructed and stays valid for the object's lifetime; we borrow a
    // fresh clone without taking ownership of the leaked reference.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn send(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(text) = arg_string(scope, &args, 0) else {
        throw(scope, "socket.send(text): text must be a string");
        return;
    };
    if let Some(inner) = inner_of(scope, args.this().into()) {
        let mut sink = inner.sink.lock().unwrap();
        if let Err(err) = sink.send(Message::Text(text)) {
            throw(scope, &format!("WebSocket send failed: {err}"));
        }
    }
}

fn close(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    if let Some(inner) = inner_of(scope, args.this().into()) {
        inner.closed.store(true, Ordering::SeqCst);
        let _ = inner.sink.lock().unwrap().close(None);
    }
}

fn on_message(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Ok(callback): Result<v8::Local<v8::Function>, _> = args.get(0).try_into() else {
        throw(scope, "socket.onmessage(fn): fn must be a function");
        return;
    };
    if let Some(inner) = inner_of(scope, args.this().into()) {
        *inner.on_message.lock().unwrap() = Some(v8::Global::new(scope, callback));
    }
}
