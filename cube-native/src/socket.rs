// Copyright 2026 the Cube authors. MIT license.
//
// `$native("socket")` (§4.G "socket | raw TCP/UDP"). Grounded in
// `internal/module/socket.go`'s `Socket`/`SocketListener`/`SocketConn`:
// `listen(protocol, port)` registers the listener with the owning
// Worker so it is torn down on interrupt (`worker.AddHandle`, mapped
// here onto `WorkerState::add_defer`), `dial` opens a client connection,
// `accept` blocks for the next inbound connection, and each connection
// exposes a buffered `readLine`/`write`/`close`. UDP is supported
// minimally (`send`/`recv` on a bound socket) — §1's "registration
// mechanism is in scope, internals are not" covers the simplification of
// not layering a full framed-protocol abstraction over it.

use std::cell::RefCell;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cube_core::vm::WorkerState;

use crate::support::{arg_bytes, arg_i64, arg_string, make_bytes, set_method, throw, throw_on_err, worker_state};

pub fn factory<'s>(scope: &mut v8::HandleScope<'s>, _state: &Rc<RefCell<WorkerState>>) -> v8::Local<'s, v8::Value> {
    let obj = v8::Object::new(scope);
    set_method(scope, obj, "listen", listen);
    set_method(scope, obj, "dial", dial);
    set_method(scope, obj, "listenUdp", listen_udp);
    obj.into()
}

fn bind_addr(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments, index: i32) -> Option<i64> {
    arg_i64(scope, args, index)
}

/// A listening socket plus the flag that actually makes it interruptible.
/// `listen()` puts the listener in non-blocking mode so `accept()` can
/// poll it instead of parking in the kernel; the defer registered at
/// `listen()` time flips `closed` rather than merely dropping its own
/// `Arc` clone, which on its own would leave the fd open as long as
/// `accept()`'s clone (reconstructed every call via `listener_of`) is
/// still alive (§9 "a listener defer that closes the socket is how
/// accept() is made cancellable").
struct Listener {
    inner: TcpListener,
    closed: AtomicBool,
}

/// How long a single non-blocking `accept()` poll waits before retrying.
/// Bounds how quickly a defer's `closed` flag is noticed once set.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

fn listen(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(port) = bind_addr(scope, &args, 1) else {
        throw(scope, "socket.listen(protocol, port): port must be a number");
        return;
    };
    let listener = match TcpListener::bind(("0.0.0.0", port as u16)) {
        Ok(listener) => listener,
        Err(err) => {
            throw(scope, &err.to_string());
            return;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        throw(scope, &err.to_string());
        return;
    }

    // §4.D "Interrupt": an open listener is released the same way any
    // other Worker-held handle is — via a defer that runs on reset or
    // interrupt, never left to the OS to reclaim on process exit alone.
    let listener = Arc::new(Listener {
        inner: listener,
        closed: AtomicBool::new(false),
    });
    {
        let listener = listener.clone();
        worker_state(scope).borrow_mut().add_defer(move || {
            listener.closed.store(true, Ordering::SeqCst);
        });
    }

    rv.set(bind_listener(scope, listener).into());
}

fn bind_listener<'s>(scope: &mut v8::HandleScope<'s>, listener: Arc<Listener>) -> v8::Local<'s, v8::Object> {
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(listener) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__listener").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "accept", accept);
    obj
}

fn listener_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<Listener>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__listener")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Listener;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

/// Polls the (non-blocking) listener for an inbound connection, checking
/// `closed` between attempts so a defer run from another thread (see
/// `cube_core::pool::WorkerHandle::force_interrupt`) actually terminates
/// a Worker parked here, instead of this call riding out however long the
/// next connection takes to arrive.
fn accept(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(listener) = listener_of(scope, args.this().into()) else {
        throw(scope, "listener.accept: not a listener");
        return;
    };
    loop {
        if listener.closed.load(Ordering::SeqCst) {
            throw(scope, "listener closed");
            return;
        }
        match listener.inner.accept() {
            Ok((stream, _addr)) => {
                if let Err(err) = stream.set_nonblocking(false) {
                    throw(scope, &err.to_string());
                    return;
                }
                rv.set(bind_conn(scope, stream).into());
                return;
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
                continue;
            }
            Err(err) => {
                throw(scope, &err.to_string());
                return;
            }
        }
    }
}

fn dial(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(host) = arg_string(scope, &args, 1) else {
        throw(scope, "socket.dial(protocol, host, port): host must be a string");
        return;
    };
    let Some(port) = arg_i64(scope, &args, 2) else {
        throw(scope, "socket.dial(protocol, host, port): port must be a number");
        return;
    };
    match TcpStream::connect((host.as_str(), port as u16)) {
        Ok(stream) => rv.set(bind_conn(scope, stream).into()),
        Err(err) => throw(scope, &err.to_string()),
    }
}

struct Conn {
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
}

fn bind_conn<'s>(scope: &mut v8::HandleScope<'s>, stream: TcpStream) -> v8::Local<'s, v8::Object> {
    let writer = stream.try_clone().expect("TcpStream::try_clone");
    let conn = Arc::new(Conn {
        reader: Mutex::new(BufReader::new(stream)),
        writer: Mutex::new(writer),
    });
    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(conn) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__conn").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "readLine", read_line);
    set_method(scope, obj, "write", write_conn);
    set_method(scope, obj, "close", close_conn);
    obj
}

fn conn_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<Conn>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__conn")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const Conn;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

/// `io.EOF` maps to a `nil, nil` return in the original; we surface the
/// same "no more data" case as an empty-and-done signal by returning
/// `null` rather than an empty buffer.
fn read_line(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(conn) = conn_of(scope, args.this().into()) else {
        throw(scope, "conn.readLine: not a connection");
        return;
    };
    let mut line = Vec::new();
    let read = conn.reader.lock().unwrap().read_until(b'\n', &mut line);
    match read {
        Ok(0) => rv.set(v8::null(scope).into()),
        Ok(_) => rv.set(make_bytes(scope, &line)),
        Err(err) => throw(scope, &err.to_string()),
    }
}

fn write_conn(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(conn) = conn_of(scope, args.this().into()) else {
        throw(scope, "conn.write: not a connection");
        return;
    };
    let Some(bytes) = arg_bytes(scope, &args, 0) else {
        throw(scope, "conn.write(data): data must be a string or buffer");
        return;
    };
    let mut writer = conn.writer.lock().unwrap();
    let written = writer.write_all(&bytes).and_then(|_| writer.flush()).map(|_| bytes.len());
    if let Some(count) = throw_on_err(scope, written) {
        rv.set(v8::Integer::new(scope, count as i32).into());
    }
}

fn close_conn(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    if let Some(conn) = conn_of(scope, args.this().into()) {
        let _ = conn.writer.lock().unwrap().shutdown(std::net::Shutdown::Both);
    }
}

fn listen_udp(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(port) = arg_i64(scope, &args, 0) else {
        throw(scope, "socket.listenUdp(port): port must be a number");
        return;
    };
    let socket = match UdpSocket::bind(("0.0.0.0", port as u16)) {
        Ok(socket) => socket,
        Err(err) => {
            throw(scope, &err.to_string());
            return;
        }
    };
    let socket = Arc::new(socket);
    {
        let socket = socket.clone();
        worker_state(scope).borrow_mut().add_defer(move || drop(socket));
    }

    let obj = v8::Object::new(scope);
    let external = v8::External::new(scope, Arc::into_raw(socket) as *mut std::ffi::c_void);
    let key = v8::String::new(scope, "__udp").unwrap();
    obj.set(scope, key.into(), external.into());
    set_method(scope, obj, "send", udp_send);
    set_method(scope, obj, "recv", udp_recv);
    rv.set(obj.into());
}

fn udp_of(scope: &mut v8::HandleScope, this: v8::Local<v8::Value>) -> Option<Arc<UdpSocket>> {
    let object: v8::Local<v8::Object> = this.try_into().ok()?;
    let key = v8::String::new(scope, "__udp")?;
    let value = object.get(scope, key.into())?;
    let external: v8::Local<v8::External> = value.try_into().ok()?;
    let ptr = external.value() as *const UdpSocket;
    // SAFETY: leaked at construction, stays valid for the object's life.
    let borrowed = unsafe { Arc::from_raw(ptr) };
    let clone = borrowed.clone();
    std::mem::forget(borrowed);
    Some(clone)
}

fn udp_send(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, _rv: v8::ReturnValue) {
    let Some(socket) = udp_of(scope, args.this().into()) else {
        throw(scope, "udp.send: not a udp socket");
        return;
    };
    let Some(host) = arg_string(scope, &args, 0) else {
        throw(scope, "udp.send(host, port, data): host must be a string");
        return;
    };
    let Some(port) = arg_i64(scope, &args, 1) else {
        throw(scope, "udp.send(host, port, data): port must be a number");
        return;
    };
    let Some(bytes) = arg_bytes(scope, &args, 2) else {
        throw(scope, "udp.send(host, port, data): data must be a string or buffer");
        return;
    };
    if let Err(err) = socket.send_to(&bytes, (host.as_str(), port as u16)) {
        throw(scope, &err.to_string());
    }
}

fn udp_recv(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
    let Some(socket) = udp_of(scope, args.this().into()) else {
        throw(scope, "udp.recv: not a udp socket");
        return;
    };
    let mut buf = [0u8; 65536];
    match socket.recv(&mut buf) {
        Ok(count) => rv.set(make_bytes(scope, &buf[..count])),
        Err(err) => throw(scope, &err.to_string()),
    }
}
