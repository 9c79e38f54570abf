// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! MTA-STS policy document provider.
//!
//! The document is either rendered once from static configuration or
//! relayed per request from an upstream policy host. See RFC 8461 §3.2
//! for the text format.

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Path the policy is served on.
pub const WELL_KNOWN_PATH: &str = "/.well-known/mta-sts.txt";

/// Policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StsMode {
    Testing,
    Enforce,
    None,
}

impl fmt::Display for StsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testing => write!(f, "testing"),
            Self::Enforce => write!(f, "enforce"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid STS mode {0:?}: expected one of 'testing', 'enforce', 'none'")]
pub struct InvalidMode(pub String);

impl FromStr for StsMode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "testing" => Ok(Self::Testing),
            "enforce" => Ok(Self::Enforce),
            "none" => Ok(Self::None),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

/// A locally generated policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StsPolicy {
    pub mode: StsMode,
    /// Seconds a sender may cache the policy
    pub max_age: u64,
    /// MX patterns, rendered in this order
    pub mx: Vec<String>,
}

impl StsPolicy {
    /// Render the policy text, CRLF-terminated.
    pub fn render(&self) -> String {
        let mut text = format!(
            "version: STSv1\r\nmode: {}\r\nmax_age: {}\r\n",
            self.mode, self.max_age
        );
        for mx in &self.mx {
            text.push_str("mx: ");
            text.push_str(mx);
            text.push_str("\r\n");
        }
        text
    }
}

/// Upstream fetch failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream {url} returned {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
}

/// Build the upstream URL for a mirrored mail domain.
pub fn mirror_url(domain: &str) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "https://mta-sts.{}{WELL_KNOWN_PATH}",
        domain.trim().trim_end_matches('.')
    ))
}

/// Relays an upstream policy document on every request.
#[derive(Debug, Clone)]
pub struct MirrorRelay {
    url: Url,
    client: reqwest::Client,
}

impl MirrorRelay {
    /// Relay for `url`. Every fetch is bounded by `timeout`.
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { url, client })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch the upstream body, unmodified.
    pub async fn fetch(&self) -> Result<Bytes, FetchError> {
        let transport = |source| FetchError::Transport {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        debug!(url = %self.url, len = body.len(), "Fetched upstream policy");
        Ok(body)
    }
}

/// Where the served document comes from.
#[derive(Debug, Clone)]
pub enum PolicyProvider {
    /// Rendered at startup, reused for every request
    Local(Bytes),
    /// Fetched per request, never cached
    Mirror(MirrorRelay),
}

impl PolicyProvider {
    pub fn local(policy: &StsPolicy) -> Self {
        Self::Local(Bytes::from(policy.render()))
    }

    pub fn mirror(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        MirrorRelay::new(url, timeout).map(Self::Mirror)
    }

    /// The current document.
    ///
    /// Upstream failures are logged and yield an empty body; the
    /// responder still answers 200.
    pub async fn document(&self) -> Bytes {
        match self {
            Self::Local(body) => body.clone(),
            Self::Mirror(relay) => match relay.fetch().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %relay.url(), error = %e, "Upstream policy fetch failed, serving empty policy");
                    Bytes::new()
                }
            },
        }
    }
}
