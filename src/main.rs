// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! MTA-STS Bastion Service
//!
//! Serves an MTA-STS policy document and, in TLS mode, decides per
//! hostname whether a certificate may be obtained on demand.
//!
//! ## Usage
//!
//! Two transports are supported:
//!
//! 1. **Direct TLS** (default): listens on :443. Hostnames are admitted by
//!    `--domain` (whitelist) or `--my-real-host` (CNAME check plus a
//!    cooldown of `--try-cert-no-more-often-than` seconds). A 404-only
//!    liveness listener runs on `PORT`.
//!
//! 2. **Plain HTTP** (`--http`): listens on `PORT` behind an
//!    HTTPS-terminating proxy; nothing is issued.
//!
//! The document is either built from `--sts-mode`, `--sts-max-age` and
//! `--sts-mx`, or relayed from `--mirror-sts-from`.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mta_sts_bastion::{
    certs::DirCertificateSource,
    config::{Args, Config, HostPolicyConfig, PolicySource, Transport},
    handlers::{router, AppState},
    policy::HostPolicy,
    resolver::SystemResolver,
    sts::PolicyProvider,
    tracker::FsAttemptTracker,
    transport,
};

const HTTPS_PORT: u16 = 443;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = match Config::from_args(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    info!(config = %serde_json::to_string(&config)?, "Starting MTA-STS bastion");

    let provider = match &config.policy_source {
        PolicySource::Local(policy) => PolicyProvider::local(policy),
        PolicySource::Mirror { url, timeout } => {
            info!(url = %url, timeout_secs = timeout.as_secs(), "Mirroring upstream policy");
            PolicyProvider::mirror(url.clone(), *timeout)?
        }
    };
    let app = router(Arc::new(AppState { provider }));

    let plain_addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    match &config.transport {
        Transport::Http => {
            let listener = TcpListener::bind(plain_addr).await?;
            transport::serve_http(listener, app).await?;
        }
        Transport::Tls { acme_directory } => {
            info!(
                acme_directory = acme_directory.as_deref().unwrap_or("default"),
                "Certificates are issued on demand"
            );
            let gate = Arc::new(build_host_policy(&config)?);
            let certs = Arc::new(DirCertificateSource::new(&config.certs_dir()));

            let liveness = TcpListener::bind(plain_addr).await?;
            tokio::spawn(async move {
                if let Err(e) = transport::serve_liveness(liveness).await {
                    error!(error = %e, "Liveness listener failed");
                }
            });

            let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], HTTPS_PORT))).await?;
            transport::serve_tls(listener, app, gate, certs).await?;
        }
    }

    Ok(())
}

fn build_host_policy(config: &Config) -> anyhow::Result<HostPolicy> {
    match &config.host_policy {
        Some(HostPolicyConfig::Whitelist(domains)) => Ok(HostPolicy::whitelist(domains)),
        Some(HostPolicyConfig::Cname { canonical_host }) => Ok(HostPolicy::cname(
            canonical_host,
            config.cooldown,
            Arc::new(FsAttemptTracker::new(&config.certificate_dir)),
            Arc::new(SystemResolver::new()?),
        )),
        None => anyhow::bail!("TLS transport requires a host policy"),
    }
}
