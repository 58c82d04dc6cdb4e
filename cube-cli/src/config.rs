// Copyright 2026 the Cube authors. MIT license.
//
// Startup flags (§6 "Startup flags"). Grounded in
// `original_source/internal/config/config.go`'s `flag.IntVar`/`BoolVar`
// calls for the exact flag letters and defaults; expressed with `clap`
// derive, the workspace's CLI dependency, in place of the original's
// hand-rolled `flag` package usage.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser, Clone)]
#[command(name = "cube", about = "Self-hosted script-artifact application server")]
pub struct Config {
    /// VM pool size.
    #[arg(short = 'n', long = "workers", default_value_t = 1)]
    pub pool_size: usize,

    /// HTTP listen port.
    #[arg(short = 'p', long = "port", default_value_t = 8090)]
    pub port: u16,

    /// Serve over TLS.
    #[arg(short = 's', long = "tls")]
    pub tls: bool,

    /// Also accept HTTP/3 (QUIC) on the same port.
    #[arg(short = '3', long = "http3")]
    pub http3: bool,

    /// TLS private key path (PEM).
    #[arg(short = 'k', long = "key")]
    pub tls_key: Option<PathBuf>,

    /// TLS certificate path (PEM).
    #[arg(short = 'c', long = "cert")]
    pub tls_cert: Option<PathBuf>,

    /// Require and verify client certificates against `./ca.crt`.
    #[arg(short = 'v', long = "verify-client")]
    pub verify_client: bool,

    /// Digest-auth credentials for authoring endpoints, `user:pass`.
    #[arg(short = 'a', long = "auth")]
    pub auth: Option<String>,

    /// Path to the sqlite artifact store.
    #[arg(long = "db", default_value = "cube.db")]
    pub db_path: String,

    /// Directory backing the `file` native module's sandbox root.
    #[arg(long = "files-dir", default_value = "files")]
    pub files_dir: String,

    /// Log file path (line-oriented, append-only, rotated daily).
    #[arg(long = "log-dir", default_value = ".")]
    pub log_dir: String,
}

impl Config {
    pub fn parse_args() -> Self {
        Config::parse()
    }

    /// `user:pass` split for the `/source` digest-auth gate. `None` means
    /// the authoring endpoints are left unreachable (no credentials were
    /// configured to challenge against).
    pub fn auth_credentials(&self) -> Option<(&str, &str)> {
        let raw = self.auth.as_deref()?;
        let (user, pass) = raw.split_once(':')?;
        Some((user, pass))
    }
}
