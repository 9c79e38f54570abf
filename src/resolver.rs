// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! CNAME resolution for the gatekeeper.
//!
//! A recursive resolver answers a CNAME-type query with a single hop, so
//! the chain is walked one query at a time until a name without a CNAME
//! record is reached.

use crate::hostname;
use async_trait::async_trait;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioResolver;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Longest alias chain followed before giving up.
pub const MAX_CNAME_HOPS: usize = 8;

/// CNAME lookup failure. The gatekeeper denies on any of these.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Failed to create resolver: {0}")]
    Setup(String),

    #[error("CNAME lookup for {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("No CNAME record for {0}")]
    NoCname(String),

    #[error("CNAME chain for {0} exceeds {MAX_CNAME_HOPS} hops")]
    ChainTooLong(String),
}

/// Resolves a hostname to its canonical name.
#[async_trait]
pub trait CnameResolver: Send + Sync {
    /// Target of the CNAME record at `host`, normalized. `None` when the
    /// name exists but carries no CNAME.
    async fn cname(&self, host: &str) -> Result<Option<String>, ResolutionError>;

    /// Follow the alias chain from `host` to its last target.
    ///
    /// `host` itself must be an alias; a chain longer than
    /// [`MAX_CNAME_HOPS`] is an error.
    async fn canonical_name(&self, host: &str) -> Result<String, ResolutionError> {
        let mut current = self
            .cname(host)
            .await?
            .ok_or_else(|| ResolutionError::NoCname(host.to_string()))?;

        for _ in 1..MAX_CNAME_HOPS {
            match self.cname(&current).await? {
                Some(next) => current = next,
                None => {
                    debug!(host, target = %current, "Resolved CNAME chain");
                    return Ok(current);
                }
            }
        }
        Err(ResolutionError::ChainTooLong(host.to_string()))
    }
}

/// Resolver using the system DNS configuration.
pub struct SystemResolver {
    inner: TokioResolver,
}

impl SystemResolver {
    pub fn new() -> Result<Self, ResolutionError> {
        let inner = TokioResolver::builder_tokio()
            .map_err(|e| ResolutionError::Setup(e.to_string()))?
            .build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl CnameResolver for SystemResolver {
    async fn cname(&self, host: &str) -> Result<Option<String>, ResolutionError> {
        let lookup = match self.inner.lookup(host, RecordType::CNAME).await {
            Ok(lookup) => lookup,
            // NOERROR with an empty answer: the chain ends here.
            Err(e) if e.is_no_records_found() && !e.is_nx_domain() => return Ok(None),
            Err(e) => {
                return Err(ResolutionError::Lookup {
                    host: host.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let target = lookup.iter().find_map(|rdata| match rdata {
            RData::CNAME(cname) => Some(hostname::normalize(&cname.0.to_utf8())),
            _ => None,
        });
        debug!(host, target = ?target, "CNAME hop");
        Ok(target)
    }
}

/// Fixed CNAME answers, for tests and offline deployments.
///
/// Names registered with [`with_name`](Self::with_name) exist without an
/// alias; any other unknown name is NXDOMAIN. A CNAME target counts as an
/// existing name.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    answers: HashMap<String, Option<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `host` with `target`.
    pub fn with_cname(mut self, host: &str, target: &str) -> Self {
        let target = hostname::normalize(target);
        self.answers.entry(target.clone()).or_insert(None);
        self.answers.insert(hostname::normalize(host), Some(target));
        self
    }

    /// Make `host` exist with address records only.
    pub fn with_name(mut self, host: &str) -> Self {
        self.answers.entry(hostname::normalize(host)).or_insert(None);
        self
    }
}

#[async_trait]
impl CnameResolver for StaticResolver {
    async fn cname(&self, host: &str) -> Result<Option<String>, ResolutionError> {
        self.answers
            .get(&hostname::normalize(host))
            .cloned()
            .ok_or_else(|| ResolutionError::Lookup {
                host: host.to_string(),
                reason: "NXDOMAIN".to_string(),
            })
    }
}
