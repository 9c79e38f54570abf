// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Listeners for the responder.
//!
//! The policy router is the same in every mode; only the way connections
//! reach it differs:
//!
//! - [`serve_http`]: plain HTTP, for deployments behind a terminating proxy.
//! - [`serve_tls`]: direct TLS. A ClientHello whose SNI already has a
//!   certificate is served straight away. Otherwise the hostname goes
//!   through the [`HostPolicy`] gatekeeper before one is obtained; a
//!   denied hostname fails its own handshake and nothing else.
//! - [`serve_liveness`]: plain HTTP that answers 404 to everything, so a
//!   container host can probe a TLS deployment.

use crate::certs::CertificateSource;
use crate::policy::{Decision, HostPolicy};
use anyhow::Context;
use axum::{extract::ConnectInfo, http::StatusCode, Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info, warn};

/// Serve `app` over plain HTTP.
pub async fn serve_http(listener: TcpListener, app: Router) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Serving policy over HTTP");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Answer every request with 404.
pub async fn serve_liveness(listener: TcpListener) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Serving liveness endpoint");
    let app = Router::new().fallback(|| async { StatusCode::NOT_FOUND });
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serve `app` over TLS with gated certificate selection.
pub async fn serve_tls(
    listener: TcpListener,
    app: Router,
    gate: Arc<HostPolicy>,
    certs: Arc<dyn CertificateSource>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "Serving policy over HTTPS");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };

        let app = app.clone();
        let gate = Arc::clone(&gate);
        let certs = Arc::clone(&certs);

        tokio::spawn(async move {
            if let Err(e) = handle_tls_connection(stream, peer, app, &gate, certs.as_ref()).await {
                debug!(peer = %peer, error = %e, "TLS connection ended with error");
            }
        });
    }
}

async fn handle_tls_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    gate: &HostPolicy,
    certs: &dyn CertificateSource,
) -> anyhow::Result<()> {
    let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream)
        .await
        .context("reading ClientHello")?;

    let host = start
        .client_hello()
        .server_name()
        .map(str::to_owned)
        .context("ClientHello carries no SNI")?;

    let cert = match certs.existing(&host).await? {
        Some(cert) => cert,
        None => {
            if let Decision::Denied(reason) = gate.authorize(&host).await {
                anyhow::bail!("certificate for {host} refused: {reason}");
            }
            certs
                .obtain(&host)
                .await
                .with_context(|| format!("no certificate for {host}"))?
        }
    };

    let tls = start
        .into_stream(Arc::new(server_config(cert)?))
        .await
        .context("TLS handshake")?;

    let service = TowerToHyperService::new(app.layer(Extension(ConnectInfo(peer))));
    Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// TLS 1.2 and 1.3 only, one certificate per connection.
///
/// The provider is explicit: the HTTP client links a second one, which
/// leaves rustls without a process default.
fn server_config(cert: Arc<CertifiedKey>) -> Result<ServerConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(FixedCert(cert)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

#[derive(Debug)]
struct FixedCert(Arc<CertifiedKey>);

impl ResolvesServerCert for FixedCert {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}
