// Copyright 2026 the Cube authors. MIT license.
//
// Process-wide collaborators the three dispatchers (§4.F) share, built
// once at startup and handed around by `Arc` the way the teacher's `cli`
// crate assembles its `ProcState`/`CliFactory` before the server loop
// starts.

use std::sync::Arc;

use parking_lot::RwLock;

use cube_core::{ArtifactStore, ProgramCache, RouteTable, VmPool};

use crate::config::Config;
use crate::dispatch::{cron::CronSupervisor, daemon::DaemonSupervisor};

pub struct AppState {
    pub config: Config,
    pub pool: Arc<VmPool>,
    pub store: Arc<dyn ArtifactStore>,
    pub program_cache: Arc<ProgramCache>,
    pub routes: RwLock<RouteTable>,
    pub daemons: DaemonSupervisor,
    pub crontabs: CronSupervisor,
    pub auth_nonce: String,
    pub auth_opaque: String,
}

impl AppState {
    /// Rebuilds the route table from scratch against the current store
    /// contents (§4.A step 2's "from-scratch rebuild" path, used at
    /// startup and after a bulk import per §9's open question on
    /// cache/route-table atomicity).
    pub fn rebuild_routes(&self) -> cube_core::CubeResult<()> {
        let controllers = self.store.list_active_controllers()?;
        let table = RouteTable::rebuild(&controllers)?;
        *self.routes.write() = table;
        Ok(())
    }
}
