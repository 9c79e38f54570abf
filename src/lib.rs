// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! MTA-STS Bastion
//!
//! Publishes a mail domain's MTA-STS policy on
//! `/.well-known/mta-sts.txt` and, when terminating TLS itself, gates
//! on-demand certificate issuance per hostname:
//!
//! - Whitelist of `mta-sts.<domain>` names, or
//! - CNAME-to-canonical-host check plus a durable per-host cooldown
//! - Locally rendered policy, or a relay of an upstream policy
//! - Plain HTTP or gated TLS transport over one router

pub mod certs;
pub mod config;
pub mod handlers;
pub mod hostname;
pub mod policy;
pub mod resolver;
pub mod sts;
pub mod tracker;
pub mod transport;

pub use config::Config;
pub use policy::{Decision, DenyReason, HostPolicy};
pub use sts::{PolicyProvider, StsMode, StsPolicy};
pub use tracker::{AttemptTracker, FsAttemptTracker};
