// Copyright 2026 the Cube authors. MIT license.
//
// TLS setup for the `-s`/`-k`/`-c`/`-v` flags (§6). Grounded in
// `original_source/main.go`'s `tls.Config{ClientAuth:
// tls.RequireAndVerifyClientCert}` loading `./ca.crt`, ported onto
// `rustls`/`tokio-rustls`/`rustls-pemfile` — the same TLS stack the
// teacher itself carries (`ext/tls`, `ext/node_tls`) for its own
// HTTPS-serving code paths.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::Config;

const CA_PATH: &str = "./ca.crt";

pub fn build_acceptor(config: &Config) -> anyhow::Result<TlsAcceptor> {
    let key_path = config
        .tls_key
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("-s requires -k <key path>"))?;
    let cert_path = config
        .tls_cert
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("-s requires -c <cert path>"))?;

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let builder = ServerConfig::builder();
    let server_config = if config.verify_client {
        let roots = load_certs(&std::path::PathBuf::from(CA_PATH))?;
        let mut store = RootCertStore::empty();
        for cert in roots {
            store.add(cert)?;
        }
        let verifier = WebPkiClientVerifier::builder(Arc::new(store)).build()?;
        builder.with_client_cert_verifier(verifier).with_single_cert(certs, key)?
    } else {
        builder.with_no_client_auth().with_single_cert(certs, key)?
    };

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Reloads the same cert/key pair `build_acceptor` used, for the
/// independent `quinn::ServerConfig` the `-3` listener needs — `quinn`
/// takes ownership of its own `CertificateDer`/`PrivateKeyDer` rather
/// than sharing `rustls::ServerConfig` with the TCP listener.
pub fn load_certs_for_quic(config: &Config) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_path = config
        .tls_cert
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("-3 with -s requires -c <cert path>"))?;
    load_certs(cert_path)
}

pub fn load_key_for_quic(config: &Config) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_path = config
        .tls_key
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("-3 with -s requires -k <key path>"))?;
    load_key(key_path)
}

fn load_certs(path: &std::path::Path) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| anyhow::anyhow!("opening {path:?}: {e}"))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow::anyhow!("parsing certificates in {path:?}: {e}"))
}

fn load_key(path: &std::path::Path) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| anyhow::anyhow!("opening {path:?}: {e}"))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| anyhow::anyhow!("no private key found in {path:?}"))
}
