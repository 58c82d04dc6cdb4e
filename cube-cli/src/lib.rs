// Copyright 2026 the Cube authors. MIT license.
//
// Library surface backing the `cube` binary, the way the teacher's own
// `cli` crate carries both a `[lib]` and a `[[bin]]` target so its
// integration tests can drive the dispatch/server machinery directly
// instead of only through a spawned subprocess.

pub mod config;
pub mod digest;
pub mod dispatch;
pub mod http3;
pub mod logging;
pub mod monitor;
pub mod response;
pub mod server;
pub mod state;
pub mod tls;
