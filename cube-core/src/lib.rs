// Copyright 2026 the Cube authors. MIT license.
//
// `cube_core`: the artifact store, compiled-program cache, module
// linker, VM pool, event loop, Worker, and HTTP run context that
// together implement Cube's script engine (§4.A-§4.E). Concrete native
// capabilities (§4.G "Modules") live in `cube_native`; the three
// dispatchers (§4.F) live in `cube_cli`. This crate plays the role the
// teacher's `deno_core` plays for its own CLI: the embeddable runtime,
// with the extension/op tables populated by its caller.

pub mod artifact;
pub mod context;
pub mod error;
pub mod event_loop;
pub mod linker;
pub mod pool;
pub mod program_cache;
pub mod registry;
pub mod route;
pub mod vm;
pub mod worker;

pub use artifact::{Artifact, ArtifactStore, ArtifactType, ControllerRoute, CrontabEntry, SqliteArtifactStore};
pub use context::{HttpOutcome, HttpRequestState, ServiceResponse};
pub use error::{CubeError, CubeResult};
pub use event_loop::{EventLoop, EventTaskTrigger};
pub use pool::{HttpCall, PoolTicket, VmPool};
pub use program_cache::{CompiledProgram, ProgramCache};
pub use registry::{BuiltinInstaller, NativeFactory, NativeRegistry};
pub use route::{MatchedRoute, RouteTable};
pub use vm::{init_v8_platform, Job, TimerHandle, WorkerState};
pub use worker::Worker;
