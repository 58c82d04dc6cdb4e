// Copyright 2026 the Cube authors. MIT license.
//
// HTTP/3 (`-3`, §6). The original serves HTTP/3 via `quic-go/http3`; no
// crate in this workspace's retrieval pack implements the HTTP/3 framing
// layer on top of QUIC (no `h3`/`h3-quinn` anywhere in the pack), and
// fabricating one would violate "never fabricate dependencies". `quinn`
// itself *is* a real, teacher-carried dependency (its own Cargo.toml
// lists it for QUIC transport), so `-3` is scoped down here to a genuine
// QUIC listener that accepts and logs connections and closes them with
// an explanatory reason, rather than a full request/response bridge —
// an honest partial implementation instead of a silently-fabricated one.
// See DESIGN.md for the open-question decision.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::Endpoint;

pub async fn run_quic_listener(addr: SocketAddr, certs: Vec<rustls::pki_types::CertificateDer<'static>>, key: rustls::pki_types::PrivateKeyDer<'static>) -> anyhow::Result<()> {
    let mut server_config = quinn::ServerConfig::with_single_cert(certs, key)?;
    Arc::get_mut(&mut server_config.transport)
        .map(|t| t.max_concurrent_uni_streams(0u32.into()));
    let endpoint = Endpoint::server(server_config, addr)?;
    tracing::info!(%addr, "listening (quic, HTTP/3 request framing not implemented)");

    while let Some(incoming) = endpoint.accept().await {
        tokio::spawn(async move {
            match incoming.await {
                Ok(connection) => {
                    tracing::debug!(remote = %connection.remote_address(), "QUIC connection accepted; closing (HTTP/3 not served)");
                    connection.close(0u32.into(), b"http3 not implemented, retry over https");
                }
                Err(err) => tracing::debug!(error = %err, "QUIC handshake failed"),
            }
        });
    }
    Ok(())
}
