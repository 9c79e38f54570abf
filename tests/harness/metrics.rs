// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Decision tallies for storm simulation results.

use mta_sts_bastion::policy::{Decision, DenyReason};
use std::collections::HashMap;

/// Coarse decision outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allowed,
    NotWhitelisted,
    ResolutionFailed,
    NotCanonicalCname,
    RateLimited,
    StorageFailure,
}

impl From<&Decision> for Outcome {
    fn from(decision: &Decision) -> Self {
        match decision {
            Decision::Allowed => Self::Allowed,
            Decision::Denied(DenyReason::NotWhitelisted) => Self::NotWhitelisted,
            Decision::Denied(DenyReason::ResolutionFailed(_)) => Self::ResolutionFailed,
            Decision::Denied(DenyReason::NotCanonicalCname { .. }) => Self::NotCanonicalCname,
            Decision::Denied(DenyReason::RateLimited { .. }) => Self::RateLimited,
            Decision::Denied(DenyReason::StorageFailure(_)) => Self::StorageFailure,
        }
    }
}

/// Collects decisions per hostname.
#[derive(Debug, Default)]
pub struct StormMetrics {
    outcomes: HashMap<Outcome, usize>,
    allowed_per_host: HashMap<String, usize>,
}

impl StormMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decision.
    pub fn record(&mut self, host: &str, decision: &Decision) {
        let outcome = Outcome::from(decision);
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        if outcome == Outcome::Allowed {
            *self.allowed_per_host.entry(host.to_string()).or_insert(0) += 1;
        }
    }

    /// Total decisions recorded.
    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Count for one outcome.
    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// Allowed decisions for one hostname.
    pub fn allowed_for(&self, host: &str) -> usize {
        self.allowed_per_host.get(host).copied().unwrap_or(0)
    }

    /// Highest number of allows any single hostname received.
    pub fn max_allowed_per_host(&self) -> usize {
        self.allowed_per_host.values().copied().max().unwrap_or(0)
    }
}
