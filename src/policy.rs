// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Host policy gatekeeper for on-demand certificate issuance.
//!
//! A hostname presented during a TLS handshake that has no certificate yet
//! passes through [`HostPolicy::authorize`] before one is issued for it.
//! Two modes exist:
//!
//! 1. **Whitelist**: membership in a fixed set of `mta-sts.<domain>` names
//!    is the only gate.
//! 2. **CNAME + cooldown**: the hostname must be an alias of our canonical
//!    host, and at most one attempt per hostname is allowed per cooldown
//!    window. Attempts are recorded durably.
//!
//! Every failure path denies.

use crate::hostname;
use crate::resolver::CnameResolver;
use crate::tracker::AttemptTracker;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Label prepended to each whitelisted mail domain.
pub const POLICY_HOST_PREFIX: &str = "mta-sts.";

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Issuance may proceed
    Allowed,
    /// Issuance must not proceed
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(reason) => Some(reason),
        }
    }
}

/// Why a hostname was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Whitelist mode and the hostname is not listed
    NotWhitelisted,
    /// CNAME lookup failed
    ResolutionFailed(String),
    /// CNAME points somewhere other than the canonical host
    NotCanonicalCname { target: String },
    /// An attempt was made within the cooldown window
    RateLimited { retry_after: Duration },
    /// The attempt store could not be read or written
    StorageFailure(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWhitelisted => write!(f, "not whitelisted"),
            Self::ResolutionFailed(e) => write!(f, "resolution failed: {e}"),
            Self::NotCanonicalCname { target } => {
                write!(f, "not a cname of canonical host (points to {target})")
            }
            Self::RateLimited { retry_after } => {
                write!(f, "rate limited, retry in {}s", retry_after.as_secs())
            }
            Self::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

enum Mode {
    Whitelist(HashSet<String>),
    Cname {
        canonical_host: String,
        cooldown: Duration,
        tracker: Arc<dyn AttemptTracker>,
        resolver: Arc<dyn CnameResolver>,
    },
}

/// The gatekeeper. Immutable after construction and safe to share.
pub struct HostPolicy {
    mode: Mode,
}

impl HostPolicy {
    /// Whitelist mode over bare mail domains (`example.com` admits
    /// `mta-sts.example.com`).
    pub fn whitelist<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = domains
            .into_iter()
            .map(|d| hostname::normalize(&format!("{POLICY_HOST_PREFIX}{}", d.as_ref().trim())))
            .collect();
        Self {
            mode: Mode::Whitelist(hosts),
        }
    }

    /// CNAME + cooldown mode.
    pub fn cname(
        canonical_host: &str,
        cooldown: Duration,
        tracker: Arc<dyn AttemptTracker>,
        resolver: Arc<dyn CnameResolver>,
    ) -> Self {
        Self {
            mode: Mode::Cname {
                canonical_host: hostname::normalize(canonical_host),
                cooldown,
                tracker,
                resolver,
            },
        }
    }

    /// Decide whether a certificate may be requested for `host` now.
    pub async fn authorize(&self, host: &str) -> Decision {
        self.authorize_at(host, Utc::now()).await
    }

    /// As [`authorize`](Self::authorize), evaluated at `now`.
    pub async fn authorize_at(&self, host: &str, now: DateTime<Utc>) -> Decision {
        let host = hostname::normalize(host);

        let decision = match &self.mode {
            Mode::Whitelist(hosts) => {
                if hosts.contains(&host) {
                    Decision::Allowed
                } else {
                    Decision::Denied(DenyReason::NotWhitelisted)
                }
            }
            Mode::Cname {
                canonical_host,
                cooldown,
                tracker,
                resolver,
            } => {
                match check_cname(&host, canonical_host, resolver.as_ref()).await {
                    Ok(()) => check_cooldown(&host, now, *cooldown, tracker.as_ref()).await,
                    Err(reason) => Decision::Denied(reason),
                }
            }
        };

        match &decision {
            Decision::Allowed => info!(host = %host, "Certificate attempt authorized"),
            Decision::Denied(reason) => {
                warn!(host = %host, reason = %reason, "Certificate attempt denied")
            }
        }
        decision
    }
}

async fn check_cname(
    host: &str,
    canonical_host: &str,
    resolver: &dyn CnameResolver,
) -> Result<(), DenyReason> {
    // Our own name needs no alias.
    if host == canonical_host {
        return Ok(());
    }
    let target = resolver
        .canonical_name(host)
        .await
        .map_err(|e| DenyReason::ResolutionFailed(e.to_string()))?;
    if target != canonical_host {
        return Err(DenyReason::NotCanonicalCname { target });
    }
    Ok(())
}

async fn check_cooldown(
    host: &str,
    now: DateTime<Utc>,
    cooldown: Duration,
    tracker: &dyn AttemptTracker,
) -> Decision {
    let storage_failure = |e: crate::tracker::TrackerError| {
        Decision::Denied(DenyReason::StorageFailure(e.to_string()))
    };

    let last = match tracker.last_attempt(host).await {
        Ok(last) => last,
        Err(e) => return storage_failure(e),
    };

    match last {
        None => match tracker.claim(host, now).await {
            Ok(true) => Decision::Allowed,
            // A concurrent caller created the record first.
            Ok(false) => Decision::Denied(DenyReason::RateLimited {
                retry_after: cooldown,
            }),
            Err(e) => storage_failure(e),
        },
        Some(last) => {
            // A record from the future counts as just made.
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < cooldown {
                return Decision::Denied(DenyReason::RateLimited {
                    retry_after: cooldown - elapsed,
                });
            }
            match tracker.record_attempt(host, now).await {
                Ok(()) => Decision::Allowed,
                Err(e) => storage_failure(e),
            }
        }
    }
}
