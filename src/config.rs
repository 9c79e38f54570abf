// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the MTA-STS responder.
//!
//! Options arrive as command-line flags (each also readable from the
//! environment) and are checked once by [`Config::from_args`]. The
//! resulting [`Config`] is immutable for the life of the process.

use crate::hostname;
use crate::sts::{self, InvalidMode, StsMode, StsPolicy};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Let's Encrypt staging directory.
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Subdirectory of the certificate directory holding issued certificates.
pub const CERTS_DIR: &str = "certs";

/// Startup configuration conflicts. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Must specify --domain or --my-real-host for safety")]
    NoHostPolicy,

    #[error("Only one of --domain and --my-real-host can be used")]
    ConflictingHostPolicy,

    #[error("Can only specify either --mirror-sts-from or --sts-mx")]
    ConflictingPolicySource,

    #[error("Must specify either --mirror-sts-from or --sts-mx")]
    MissingPolicySource,

    #[error(transparent)]
    InvalidMode(#[from] InvalidMode),

    #[error("Invalid --sts-max-age {0:?}: expected a number of seconds")]
    InvalidMaxAge(String),

    #[error("Only one of --http, --staging, and --acme-endpoint can be used")]
    ConflictingAcmeEndpoint,

    #[error("Invalid hostname {0:?}")]
    InvalidHostname(String),

    #[error("Invalid mirror target: {0}")]
    InvalidMirror(#[from] url::ParseError),
}

/// Command-line flags.
#[derive(Debug, Clone, Parser)]
#[command(name = "mta-sts-bastion", about = "Serve an MTA-STS policy with gated on-demand TLS")]
pub struct Args {
    /// Mail domain(s) to serve the policy for (comma-separated); the
    /// certificate whitelist is `mta-sts.<domain>` for each
    #[arg(long, env = "STS_DOMAIN", value_delimiter = ',')]
    pub domain: Vec<String>,

    /// Directory in which to store certificates and attempt records
    #[arg(long, env = "CERTIFICATE_DIR", default_value = "certificate-dir")]
    pub certificate_dir: PathBuf,

    /// Require every unseen host to be a CNAME of this host
    #[arg(long, env = "MY_REAL_HOST")]
    pub my_real_host: Option<String>,

    /// Minimum seconds between certificate attempts for one host
    #[arg(long, env = "TRY_CERT_NO_MORE_OFTEN_THAN", default_value_t = 86_400)]
    pub try_cert_no_more_often_than: u64,

    /// Serve plain HTTP (behind an HTTPS-terminating proxy) instead of HTTPS
    #[arg(long, env = "SERVE_HTTP")]
    pub http: bool,

    /// Use the Let's Encrypt staging environment
    #[arg(long, env = "ACME_STAGING")]
    pub staging: bool,

    /// Custom ACME directory URL
    #[arg(long, env = "ACME_ENDPOINT")]
    pub acme_endpoint: Option<String>,

    /// Proxy the STS policy of this mail domain (e.g. `google.com`)
    #[arg(long, env = "MIRROR_STS_FROM")]
    pub mirror_sts_from: Option<String>,

    /// Seconds to wait for the mirrored policy
    #[arg(long, env = "MIRROR_TIMEOUT", default_value_t = 10)]
    pub mirror_timeout: u64,

    /// STS mode: 'testing', 'enforce' or 'none'
    #[arg(long, env = "STS_MODE", default_value = "testing")]
    pub sts_mode: String,

    /// Comma-separated 'mx' patterns
    #[arg(long, env = "STS_MX", value_delimiter = ',')]
    pub sts_mx: Vec<String>,

    /// STS 'max_age' in seconds
    #[arg(long, env = "STS_MAX_AGE", default_value = "2419200")]
    pub sts_max_age: String,

    /// Plain HTTP port (the policy port with --http, the liveness port otherwise)
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
}

/// Certificate gatekeeping mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostPolicyConfig {
    /// Bare mail domains
    Whitelist(Vec<String>),
    /// Hosts must alias this one
    Cname { canonical_host: String },
}

/// Source of the served document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Local(StsPolicy),
    Mirror { url: Url, timeout: Duration },
}

/// How the responder is exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Plain HTTP behind a terminating proxy
    Http,
    /// Direct TLS with on-demand certificates
    Tls {
        /// ACME directory for the issuer; `None` means its default
        acme_directory: Option<String>,
    },
}

/// Validated configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub port: u16,
    pub certificate_dir: PathBuf,
    /// Present whenever the transport is TLS
    pub host_policy: Option<HostPolicyConfig>,
    pub cooldown: Duration,
    pub policy_source: PolicySource,
    pub transport: Transport,
}

impl Config {
    /// Check flags for conflicts and build the configuration.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let domains: Vec<String> = non_empty(args.domain);
        let mx: Vec<String> = non_empty(args.sts_mx);
        let real_host = args
            .my_real_host
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());
        let acme_endpoint = args
            .acme_endpoint
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let mirror = args
            .mirror_sts_from
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        let host_policy = match (domains.is_empty(), real_host) {
            (false, Some(_)) => return Err(ConfigError::ConflictingHostPolicy),
            (false, None) => {
                for domain in &domains {
                    validate_hostname(domain)?;
                }
                Some(HostPolicyConfig::Whitelist(domains))
            }
            (true, Some(host)) => {
                validate_hostname(&host)?;
                Some(HostPolicyConfig::Cname {
                    canonical_host: hostname::normalize(&host),
                })
            }
            // Behind a terminating proxy nothing is issued, so no gate is needed.
            (true, None) if args.http => None,
            (true, None) => return Err(ConfigError::NoHostPolicy),
        };

        let policy_source = match (mirror, mx.is_empty()) {
            (Some(_), false) => return Err(ConfigError::ConflictingPolicySource),
            (None, true) => return Err(ConfigError::MissingPolicySource),
            (Some(domain), true) => {
                validate_hostname(&domain)?;
                PolicySource::Mirror {
                    url: sts::mirror_url(&domain)?,
                    timeout: Duration::from_secs(args.mirror_timeout),
                }
            }
            (None, false) => {
                let mode: StsMode = args.sts_mode.trim().parse()?;
                let max_age = args
                    .sts_max_age
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidMaxAge(args.sts_max_age.clone()))?;
                PolicySource::Local(StsPolicy { mode, max_age, mx })
            }
        };

        let transport = match (args.http, args.staging, acme_endpoint) {
            (true, false, None) => Transport::Http,
            (false, false, None) => Transport::Tls {
                acme_directory: None,
            },
            (false, true, None) => Transport::Tls {
                acme_directory: Some(LETSENCRYPT_STAGING.to_string()),
            },
            (false, false, Some(endpoint)) => Transport::Tls {
                acme_directory: Some(endpoint),
            },
            _ => return Err(ConfigError::ConflictingAcmeEndpoint),
        };

        Ok(Self {
            port: args.port,
            certificate_dir: args.certificate_dir,
            host_policy,
            cooldown: Duration::from_secs(args.try_cert_no_more_often_than),
            policy_source,
            transport,
        })
    }

    /// Directory holding issued certificates.
    pub fn certs_dir(&self) -> PathBuf {
        self.certificate_dir.join(CERTS_DIR)
    }
}

fn non_empty(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn validate_hostname(host: &str) -> Result<(), ConfigError> {
    hostname::storage_key(host)
        .map(|_| ())
        .ok_or_else(|| ConfigError::InvalidHostname(host.to_string()))
}
