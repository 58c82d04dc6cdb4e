// Copyright 2026 the Cube authors. MIT license.
//
// The listen loop(s). Grounded in the teacher's own
// `tests/util/server/src/servers/hyper_utils.rs`: bind a `TcpListener`,
// wrap each accepted stream in `hyper_util::rt::TokioIo`, and hand it to
// `hyper_util::server::conn::auto::Builder` so HTTP/1.1 and HTTP/2 are
// both served over the one listener. The teacher needs a custom
// thread-local `Executor` because its `JsRuntime` is `!Send`; Cube's
// dispatch is genuinely `Send` (controller runs cross into a
// `tokio::task::spawn_blocking`, not onto the accepting task itself), so
// this port uses `hyper_util`'s own multi-threaded `TokioExecutor`
// instead of reimplementing one.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::dispatch::http::serve;
use crate::state::AppState;

/// An independently-registered duplicate of an accepted connection's
/// socket, handed to `dispatch_service` through request extensions so it
/// can watch for a client disconnect (§4.F.1 step 5) by peeking the
/// stream without touching the bytes hyper itself is reading. Deliberately
/// a second OS-level fd (via `socket2`) rather than a second task sharing
/// the same `TcpStream`/`Arc<TcpStream>` hyper already owns: tokio only
/// supports one task registering read-interest on a given fd at a time,
/// and hyper is already that task.
#[derive(Clone)]
pub struct ConnWatch(pub Arc<tokio::net::TcpStream>);

fn duplicate_watch_handle(stream: &tokio::net::TcpStream) -> std::io::Result<ConnWatch> {
    let sock_ref = socket2::SockRef::from(stream);
    let dup = sock_ref.try_clone()?;
    dup.set_nonblocking(true)?;
    let dup = tokio::net::TcpStream::from_std(dup.into())?;
    Ok(ConnWatch(Arc::new(dup)))
}

pub async fn run_plain(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening (http)");
    loop {
        let (stream, peer) = listener.accept().await?;
        let watch = duplicate_watch_handle(&stream).ok();
        let io = TokioIo::new(stream);
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |mut req| {
                if let Some(watch) = watch.clone() {
                    req.extensions_mut().insert(watch);
                }
                serve(state.clone(), req)
            });
            if let Err(err) = Builder::new(TokioExecutor::new()).serve_connection(io, service).await {
                tracing::debug!(%peer, error = %err, "connection closed");
            }
        });
    }
}

pub async fn run_tls(state: Arc<AppState>, addr: SocketAddr, acceptor: TlsAcceptor) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening (https)");
    loop {
        let (stream, peer) = listener.accept().await?;
        let watch = duplicate_watch_handle(&stream).ok();
        let acceptor = acceptor.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::debug!(%peer, error = %err, "TLS handshake failed");
                    return;
                }
            };
            let io = TokioIo::new(tls_stream);
            let service = service_fn(move |mut req| {
                if let Some(watch) = watch.clone() {
                    req.extensions_mut().insert(watch);
                }
                serve(state.clone(), req)
            });
            if let Err(err) = Builder::new(TokioExecutor::new()).serve_connection(io, service).await {
                tracing::debug!(%peer, error = %err, "connection closed");
            }
        });
    }
}
