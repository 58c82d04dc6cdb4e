// Copyright 2026 the Cube authors. MIT license.
//
// End-to-end scenarios from spec.md §8, driven through a real listening
// socket with `reqwest` as the client, the way the teacher's own
// `tests/integration` crate drives a live server rather than calling
// handler functions directly. Scenario 4 (the 60s wall-clock timeout) and
// scenario 5 (client mid-run cancellation) are covered at the
// `cube_core::pool` unit-test layer instead of here, since exercising the
// real `SERVICE_TIMEOUT` constant end-to-end would make this suite take
// a minute per run; scenarios 1, 2, 3, and 6 are fully exercised below
// against a live `cube-cli` server.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cube_cli::config::Config;
use cube_cli::dispatch::{cron::CronSupervisor, daemon::DaemonSupervisor};
use cube_cli::state::AppState;
use cube_cli::{digest, server};
use cube_core::{init_v8_platform, ArtifactStore, ProgramCache, RouteTable, SqliteArtifactStore, VmPool};
use cube_core::registry::NativeRegistry;

fn ensure_v8_initialized() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(init_v8_platform);
}

/// Unique loopback ports per test so the suite can run with cargo's
/// default parallelism without two tests racing for the same listener.
fn next_port() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(19200);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

struct ControllerSeed {
    name: &'static str,
    url: &'static str,
    method: &'static str,
    compiled: &'static str,
}

struct DaemonSeed {
    name: &'static str,
    compiled: &'static str,
}

fn seed_store(controllers: &[ControllerSeed], daemons: &[DaemonSeed]) -> Arc<dyn ArtifactStore> {
    let store = SqliteArtifactStore::in_memory().expect("open in-memory artifact store");
    {
        let conn = store.raw_connection();
        let conn = conn.lock();
        for c in controllers {
            conn.execute(
                "insert into source (name, type, lang, content, compiled, active, method, url, cron, last_modified_date)
                 values (?1, 'controller', 'typescript', ?2, ?2, true, ?3, ?4, '', 0)",
                rusqlite::params![c.name, c.compiled, c.method, c.url],
            )
            .expect("insert controller");
        }
        for d in daemons {
            conn.execute(
                "insert into source (name, type, lang, content, compiled, active, method, url, cron, last_modified_date)
                 values (?1, 'daemon', 'typescript', ?2, ?2, true, '', '', '', 0)",
                rusqlite::params![d.name, d.compiled],
            )
            .expect("insert daemon");
        }
    }
    Arc::new(store)
}

/// Wires up a full `AppState` (pool, route table, supervisors) and starts
/// `cube-cli`'s plain-HTTP listen loop on a scratch port, mirroring
/// `main.rs`'s assembly order.
async fn spin_up(controllers: &[ControllerSeed], daemons: &[DaemonSeed]) -> (Arc<AppState>, SocketAddr) {
    ensure_v8_initialized();

    let store = seed_store(controllers, daemons);
    let program_cache = Arc::new(ProgramCache::new());
    let mut registry = NativeRegistry::new();
    cube_native::install_all(&mut registry);
    let natives = Arc::new(registry);
    let pool = Arc::new(VmPool::new(1, store.clone(), program_cache.clone(), natives));

    let daemon_supervisor = DaemonSupervisor::new(pool.clone(), store.clone());
    let cron_supervisor = CronSupervisor::new(pool.clone()).await.expect("start cron scheduler");

    let config = Config {
        pool_size: 1,
        port: 0,
        tls: false,
        http3: false,
        tls_key: None,
        tls_cert: None,
        verify_client: false,
        auth: None,
        db_path: ":memory:".to_string(),
        files_dir: "files".to_string(),
        log_dir: ".".to_string(),
    };

    let state = Arc::new(AppState {
        config,
        pool,
        store,
        program_cache,
        routes: parking_lot::RwLock::new(RouteTable::empty()),
        daemons: daemon_supervisor,
        crontabs: cron_supervisor,
        auth_nonce: digest::random_token(),
        auth_opaque: digest::random_token(),
    });
    state.rebuild_routes().expect("rebuild route table");

    let addr: SocketAddr = ([127, 0, 0, 1], next_port()).into();
    let spawned_state = state.clone();
    tokio::spawn(async move {
        let _ = server::run_plain(spawned_state, addr).await;
    });
    // Give the listener a moment to bind before the first request lands.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (state, addr)
}

/// Scenario 1: route match with a path variable.
#[tokio::test]
async fn route_match_with_path_variable() {
    let (_state, addr) = spin_up(
        &[ControllerSeed {
            name: "hello",
            url: "/greet/{who}",
            method: "",
            compiled: "module.exports = function(ctx) { return ctx.param('who'); };",
        }],
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/service/greet/world"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "world");
}

/// A non-string return value is wrapped in the `{code, message, data}`
/// envelope (§6 "On-wire response envelope").
#[tokio::test]
async fn numeric_return_is_wrapped_in_envelope() {
    let (_state, addr) = spin_up(
        &[ControllerSeed {
            name: "answer",
            url: "/answer",
            method: "",
            compiled: "module.exports = function(ctx) { return 42; };",
        }],
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/service/answer"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "0");
    assert_eq!(body["message"], "success");
    assert_eq!(body["data"], 42);
}

/// Scenario 2: method mismatch returns 405.
#[tokio::test]
async fn method_mismatch_returns_405() {
    let (_state, addr) = spin_up(
        &[ControllerSeed {
            name: "hello",
            url: "/greet/{who}",
            method: "POST",
            compiled: "module.exports = function(ctx) { return ctx.param('who'); };",
        }],
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/service/greet/x"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.text().await.unwrap(), "Method not allowed");
}

/// A path with no matching active controller is a 404, not a 405 or 503.
#[tokio::test]
async fn unmatched_route_returns_404() {
    let (_state, addr) = spin_up(
        &[ControllerSeed {
            name: "hello",
            url: "/greet/{who}",
            method: "",
            compiled: "module.exports = function(ctx) { return ctx.param('who'); };",
        }],
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/service/does-not-exist"))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

/// Scenario 3: pool exhaustion. With a pool of size 1, a request that
/// holds the only Worker for a while forces a concurrent second request
/// to fail fast with 503 rather than queue behind it.
#[tokio::test]
async fn pool_exhaustion_returns_503() {
    let (_state, addr) = spin_up(
        &[ControllerSeed {
            name: "slow",
            url: "/slow",
            method: "",
            compiled: "module.exports = function(ctx) { \
                var start = Date.now(); \
                while (Date.now() - start < 1200) {} \
                return 'slow done'; \
            };",
        }],
        &[],
    )
    .await;

    let client = reqwest::Client::new();
    let slow_addr = addr;
    let slow = tokio::spawn(async move {
        let client = reqwest::Client::new();
        client.get(format!("http://{slow_addr}/service/slow")).send().await
    });

    // Let the first request actually acquire the Worker before racing
    // the second one in behind it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = client.get(format!("http://{addr}/service/slow")).send().await.expect("second request should complete");
    assert_eq!(second.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let first = slow.await.expect("join").expect("first request should complete");
    assert_eq!(first.status(), reqwest::StatusCode::OK);
}

/// Scenario 6: daemon start/stop lifecycle. Activating a daemon starts
/// exactly one long-lived runner; deactivating it (here, a direct
/// `stop()` call, standing in for the CRUD layer's "status=false" signal
/// per §4.F.2) interrupts it and frees its Worker back to the pool
/// promptly.
#[tokio::test]
async fn daemon_start_and_stop_lifecycle() {
    let (state, _addr) = spin_up(
        &[],
        &[DaemonSeed {
            name: "ticker",
            compiled: "module.exports = function() { while (true) {} };",
        }],
    )
    .await;

    state.daemons.run_daemons("").expect("start daemons");

    let mut started = false;
    for _ in 0..20 {
        if state.daemons.running_count() == 1 {
            started = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(started, "daemon should have started within 1s");
    assert_eq!(state.pool.idle_count(), 0, "the one Worker should be held by the daemon");

    state.daemons.stop("ticker");

    let mut stopped = false;
    for _ in 0..40 {
        if state.daemons.running_count() == 0 && state.pool.idle_count() == 1 {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(stopped, "daemon should stop and release its Worker within ~2s");

    // Re-entry safety (§4.F.2): calling run_daemons again while nothing
    // is active is a no-op, not a second spawn of a now-inactive daemon
    // (the seeded row is still `active = true`, so this also covers the
    // "restart on next runDaemons call" recovery policy of §7).
    state.daemons.run_daemons("").expect("restart daemons");
    let mut restarted = false;
    for _ in 0..20 {
        if state.daemons.running_count() == 1 {
            restarted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(restarted, "daemon should restart on the next runDaemons call");
    state.daemons.stop("ticker");
}
