// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Certificate source for the TLS transport.
//!
//! A [`CertificateSource`] answers two questions. [`existing`] returns a
//! certificate already held for a hostname and never issues; the TLS
//! listener serves it without consulting the gatekeeper. [`obtain`] may
//! issue, and is only called once the gatekeeper has allowed the hostname.
//!
//! Issuance itself belongs to an external ACME client writing into the
//! directory below.
//!
//! [`existing`]: CertificateSource::existing
//! [`obtain`]: CertificateSource::obtain
//!
//! # Directory Structure
//!
//! ```text
//! certificate-dir/
//! └── certs/
//!     └── mta-sts.example.com/
//!         ├── cert.pem      # Certificate chain
//!         └── key.pem       # Private key
//! ```

use crate::hostname;
use async_trait::async_trait;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Hostname {0:?} cannot be used as a storage key")]
    InvalidHostname(String),

    #[error("No certificate available for {0}")]
    NotFound(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No private key found in {0}")]
    MissingKey(PathBuf),

    #[error("Unusable certificate for {host}: {source}")]
    Tls {
        host: String,
        #[source]
        source: rustls::Error,
    },
}

/// Supplies certificates for TLS hostnames.
#[async_trait]
pub trait CertificateSource: Send + Sync {
    /// A certificate already cached or stored for `host`.
    async fn existing(&self, host: &str) -> Result<Option<Arc<CertifiedKey>>, CertificateError>;

    /// Obtain a certificate for `host`, issuing one if the source can.
    async fn obtain(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError>;
}

/// Loads PEM certificates written by an external ACME client, caching
/// them in memory once loaded.
pub struct DirCertificateSource {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl DirCertificateSource {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    async fn read(path: &Path) -> Result<Vec<u8>, CertificateError> {
        tokio::fs::read(path).await.map_err(|source| CertificateError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn load(&self, key: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        let host_dir = self.dir.join(key);
        let cert_path = host_dir.join("cert.pem");
        let key_path = host_dir.join("key.pem");

        if !tokio::fs::try_exists(&cert_path).await.unwrap_or(false) {
            return Err(CertificateError::NotFound(key.to_string()));
        }

        let cert_pem = Self::read(&cert_path).await?;
        let key_pem = Self::read(&key_path).await?;

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CertificateError::Io { path, source }
        };

        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err(&cert_path))?;
        let key_der = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(io_err(&key_path))?
            .ok_or_else(|| CertificateError::MissingKey(key_path.clone()))?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)
            .map_err(|source| CertificateError::Tls {
                host: key.to_string(),
                source,
            })?;

        info!(host = key, path = %host_dir.display(), "Loaded certificate");
        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }
}

#[async_trait]
impl CertificateSource for DirCertificateSource {
    async fn existing(&self, host: &str) -> Result<Option<Arc<CertifiedKey>>, CertificateError> {
        let key = hostname::storage_key(host)
            .ok_or_else(|| CertificateError::InvalidHostname(host.to_string()))?;

        if let Some(cert) = self.cache.read().await.get(&key) {
            debug!(host = %key, "Certificate cache hit");
            return Ok(Some(cert.clone()));
        }

        let cert = match self.load(&key).await {
            Ok(cert) => cert,
            Err(CertificateError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.cache.write().await.insert(key, cert.clone());
        Ok(Some(cert))
    }

    /// Nothing is issued here: the ACME client may have written the
    /// certificate since the last look, otherwise it is not found.
    async fn obtain(&self, host: &str) -> Result<Arc<CertifiedKey>, CertificateError> {
        self.existing(host)
            .await?
            .ok_or_else(|| CertificateError::NotFound(host.to_string()))
    }
}
