// Copyright 2026 the Cube authors. MIT license.
//
// Native capability implementations for Cube's script VM (§4.G).
// `cube_core::registry` owns the registration *mechanism*; this crate
// supplies the concrete builtins (installed once per Worker) and
// `$native`-looked-up modules, grounded module-by-module in
// `internal/builtin/*.go` and `internal/module/*.go`. `install_all` is
// the single place `cube-cli` calls to populate a `NativeRegistry`
// before constructing the `VmPool` (§4.G "Assembly").

pub mod base64;
pub mod bqueue;
pub mod builtins;
pub mod cache;
pub mod crypto;
pub mod db;
pub mod decimal;
pub mod email;
pub mod event;
pub mod file;
pub mod http;
pub mod image;
pub mod lock;
pub mod pipe;
pub mod process;
pub mod socket;
pub mod support;
pub mod template;
pub mod ulid;
pub mod zip;

use cube_core::registry::NativeRegistry;

/// Registers every builtin global and `$native` module this crate
/// implements. Builtins run once per Worker at construction
/// (`console`, `fetch`, timers, `WebSocket`, the `Buffer`/response
/// helpers); modules are looked up lazily, once per `$native(name)`
/// call (§4.G).
pub fn install_all(registry: &mut NativeRegistry) {
    registry.register_builtin("console", builtins::console::install);
    registry.register_builtin("buffer", builtins::buffer::install);
    registry.register_builtin("service_response", builtins::service_response::install);
    registry.register_builtin("timers", builtins::timers::install);
    registry.register_builtin("fetch", builtins::fetch::install);
    registry.register_builtin("websocket", builtins::websocket::install);

    registry.register_module("base64", base64::factory);
    registry.register_module("bqueue", bqueue::factory);
    registry.register_module("cache", cache::factory);
    registry.register_module("crypto", crypto::factory);
    registry.register_module("db", db::factory);
    registry.register_module("decimal", decimal::factory);
    registry.register_module("email", email::factory);
    registry.register_module("event", event::factory);
    registry.register_module("file", file::factory);
    registry.register_module("http", http::factory);
    registry.register_module("image", image::factory);
    registry.register_module("lock", lock::factory);
    registry.register_module("pipe", pipe::factory);
    registry.register_module("process", process::factory);
    registry.register_module("socket", socket::factory);
    registry.register_module("template", template::factory);
    registry.register_module("ulid", ulid::factory);
    registry.register_module("zip", zip::factory);
}
