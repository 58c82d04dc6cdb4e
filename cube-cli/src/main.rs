// Copyright 2026 the Cube authors. MIT license.
//
// `cube-cli`: the binary. Wires together the artifact store, compiled-
// program cache, native registry, VM pool, route table, and the three
// dispatchers (§4.F) behind a `hyper` listen loop — the role the
// teacher's own `cli::main` plays for `deno_core`, assembling the
// runtime and handing it to a server loop.

use std::sync::Arc;

use cube_core::{init_v8_platform, ProgramCache, RouteTable, SqliteArtifactStore, VmPool};
use cube_native::NativeRegistry;

use cube_cli::config::Config;
use cube_cli::dispatch::{cron::CronSupervisor, daemon::DaemonSupervisor};
use cube_cli::state::AppState;
use cube_cli::{digest, http3, logging, monitor, server, tls};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();
    let _log_guard = logging::init(&config.log_dir);

    // §4.B rationale: V8 must be initialized exactly once per process,
    // before any Worker is constructed.
    init_v8_platform();

    let store: Arc<dyn cube_core::ArtifactStore> = Arc::new(SqliteArtifactStore::open(&config.db_path)?);
    let program_cache = Arc::new(ProgramCache::new());
    let mut registry = NativeRegistry::new();
    cube_native::install_all(&mut registry);
    let natives = Arc::new(registry);

    let pool = Arc::new(VmPool::new(config.pool_size, store.clone(), program_cache.clone(), natives));

    let daemons = DaemonSupervisor::new(pool.clone(), store.clone());
    let crontabs = CronSupervisor::new(pool.clone()).await?;

    let nonce = digest::random_token();
    let opaque = digest::random_token();

    let state = Arc::new(AppState {
        config: config.clone(),
        pool,
        store,
        program_cache,
        routes: parking_lot::RwLock::new(RouteTable::empty()),
        daemons,
        crontabs,
        auth_nonce: nonce,
        auth_opaque: opaque,
    });

    state.rebuild_routes()?;
    state.daemons.run_daemons("")?;
    state.crontabs.run_crontabs(&state.store, "").await?;

    tokio::spawn(monitor::run(state.clone()));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], config.port).into();

    if config.tls {
        let acceptor = tls::build_acceptor(&config)?;
        if config.http3 {
            let certs = tls::load_certs_for_quic(&config)?;
            let key = tls::load_key_for_quic(&config)?;
            tokio::spawn(http3::run_quic_listener(addr, certs, key));
        }
        server::run_tls(state, addr, acceptor).await
    } else {
        server::run_plain(state, addr).await
    }
}
