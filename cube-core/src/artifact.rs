// Copyright 2026 the Cube authors. MIT license.
//
// The artifact store (§3, §4.A). Grounded in `internal/db.go` and
// `internal/model/source.go` of the original implementation: a single
// `source` table keyed by `(name, type)`, opened against a local sqlite
// file (`cube.db`). The teacher's equivalent concern (`deno_cache_dir`,
// `rusqlite` usage in `ext/kv` / `ext/node_sqlite`) uses the same crate.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::error::{CubeError, CubeResult};

/// One of the six artifact kinds (§3). `type` is a SQL keyword, so the
/// column is named `type` but the Rust type is `ArtifactType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    Module,
    Controller,
    Daemon,
    Crontab,
    Template,
    Resource,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Module => "module",
            ArtifactType::Controller => "controller",
            ArtifactType::Daemon => "daemon",
            ArtifactType::Crontab => "crontab",
            ArtifactType::Template => "template",
            ArtifactType::Resource => "resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "module" => ArtifactType::Module,
            "controller" => ArtifactType::Controller,
            "daemon" => ArtifactType::Daemon,
            "crontab" => ArtifactType::Crontab,
            "template" => ArtifactType::Template,
            "resource" => ArtifactType::Resource,
            _ => return None,
        })
    }

    /// Artifacts of this kind are invoked by the VM pool rather than merely
    /// imported or served as text (§3 data model: "executable kinds").
    pub fn is_executable(self) -> bool {
        matches!(
            self,
            ArtifactType::Controller | ArtifactType::Daemon | ArtifactType::Crontab
        )
    }
}

/// A row of the `source` table (§3). `name` is already validated by the CRUD
/// layer against `^\w{2,32}$` (or the `node_modules/`-prefixed module form);
/// the core trusts rows that reach it.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactType,
    pub lang: String,
    pub content: String,
    pub compiled: String,
    pub active: bool,
    pub method: String,
    pub url: String,
    pub cron: String,
    pub last_modified_date: i64,
}

/// A controller's route-relevant attributes, as returned by
/// `list_active_controllers` for route-table bootstrap (§4.A).
#[derive(Debug, Clone)]
pub struct ControllerRoute {
    pub name: String,
    pub url: String,
    pub method: String,
    pub row_id: i64,
}

#[derive(Debug, Clone)]
pub struct CrontabEntry {
    pub name: String,
    pub cron: String,
}

/// The operations the linker and dispatchers need from the artifact store
/// (§4.A). Expressed as a trait, not a concrete type, per §9's "not ambient
/// globals" design note — a test can supply an in-memory fake.
pub trait ArtifactStore: Send + Sync {
    /// `getCompiled(name, type)`. Filters `active = true` for executable
    /// kinds the way `internal/worker.go`'s `require` closure does; modules
    /// are fetched active-only too, since an inactive module is invisible
    /// to the linker by the same §3 invariant.
    fn get_compiled(&self, name: &str, kind: ArtifactType) -> CubeResult<String>;

    fn get_template(&self, name: &str) -> CubeResult<String>;

    fn get_resource(&self, url: &str) -> CubeResult<Vec<u8>>;

    fn list_active_controllers(&self) -> CubeResult<Vec<ControllerRoute>>;

    fn list_active_daemons(&self, prefix: &str) -> CubeResult<Vec<String>>;

    fn list_active_crontabs(&self, prefix: &str) -> CubeResult<Vec<CrontabEntry>>;

    /// Controller method constraint lookup used by the HTTP dispatcher
    /// (`Cache.GetController` in the original) to decide 405 vs dispatch.
    fn get_controller_method(&self, name: &str) -> CubeResult<Option<String>>;

    /// The same connection the store itself queries, handed to the `db`
    /// native module (§4.G) exactly as the original passes its single
    /// `*sql.DB` into `module.register("db", ...)` alongside the Worker —
    /// script-level SQL access and artifact storage share one database.
    fn raw_connection(&self) -> Arc<parking_lot::Mutex<Connection>>;
}

/// Sqlite-backed artifact store. One connection behind a mutex, as
/// `rusqlite::Connection` is `!Sync`; the artifact store sees far less
/// traffic than the script layer's own `db` native module, so a single
/// serialized connection is adequate (§4.A "best-effort and
/// non-transactional").
pub struct SqliteArtifactStore {
    conn: Arc<parking_lot::Mutex<Connection>>,
}

impl SqliteArtifactStore {
    pub fn open(path: &str) -> CubeResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            create table if not exists source (
                name varchar(64) not null,
                type varchar(16) not null,
                lang varchar(16) not null,
                content text not null,
                compiled text not null default '',
                active boolean not null default false,
                method varchar(8) not null default '',
                url varchar(64) not null default '',
                cron varchar(16) not null default '',
                last_modified_date integer not null default 0,
                primary key(name, type)
            );
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(parking_lot::Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> CubeResult<Self> {
        Self::open(":memory:")
    }
}

impl ArtifactStore for SqliteArtifactStore {
    fn get_compiled(&self, name: &str, kind: ArtifactType) -> CubeResult<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "select compiled from source where name = ?1 and type = ?2 and active = true",
            params![name, kind.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CubeError::NotFound {
            name: name.to_string(),
            kind: kind.as_str(),
        })
    }

    fn get_template(&self, name: &str) -> CubeResult<String> {
        let conn = self.conn.lock();
        conn.query_row(
            "select content from source where name = ?1 and type = 'template' and active = true",
            params![name],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CubeError::NotFound {
            name: name.to_string(),
            kind: "template",
        })
    }

    fn get_resource(&self, url: &str) -> CubeResult<Vec<u8>> {
        let conn = self.conn.lock();
        let content: String = conn
            .query_row(
                "select content from source where url = ?1 and type = 'resource' and active = true",
                params![url],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CubeError::NotFound {
                name: url.to_string(),
                kind: "resource",
            })?;
        Ok(content.into_bytes())
    }

    fn list_active_controllers(&self) -> CubeResult<Vec<ControllerRoute>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "select name, url, method, rowid from source where type = 'controller' and active = true order by rowid desc",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ControllerRoute {
                    name: row.get(0)?,
                    url: row.get(1)?,
                    method: row.get(2)?,
                    row_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_active_daemons(&self, prefix: &str) -> CubeResult<Vec<String>> {
        let like = sql_like_prefix(prefix);
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("select name from source where name like ?1 and type = 'daemon' and active = true")?;
        let rows = stmt
            .query_map(params![like], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_active_crontabs(&self, prefix: &str) -> CubeResult<Vec<CrontabEntry>> {
        let like = sql_like_prefix(prefix);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("select name, cron from source where name like ?1 and type = 'crontab' and active = true")?;
        let rows = stmt
            .query_map(params![like], |row| {
                Ok(CrontabEntry {
                    name: row.get(0)?,
                    cron: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn get_controller_method(&self, name: &str) -> CubeResult<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "select method from source where name = ?1 and type = 'controller' and active = true",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn raw_connection(&self) -> Arc<parking_lot::Mutex<Connection>> {
        self.conn.clone()
    }
}

/// An empty prefix means "all" (`RunDaemons("")`, `RunCrontabs("")` in the
/// original map to a SQL `%` wildcard).
fn sql_like_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        "%".to_string()
    } else {
        format!("{prefix}%")
    }
}
