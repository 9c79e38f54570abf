// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for certificate-attempt storm simulation.
//!
//! Drives many concurrent `authorize` calls at the gatekeeper, the way a
//! burst of TLS handshakes would, and tallies the decisions.

pub mod generators;
pub mod metrics;
