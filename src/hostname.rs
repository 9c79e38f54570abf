// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Hostname normalization shared by the gatekeeper and the attempt store.

/// Lowercase a hostname and strip one trailing root dot.
///
/// DNS answers come back fully qualified (`mx.example.com.`) while SNI
/// values do not, so both sides are compared in this form.
pub fn normalize(host: &str) -> String {
    let host = host.trim();
    host.strip_suffix('.').unwrap_or(host).to_ascii_lowercase()
}

/// Normalize a hostname for use as a storage key.
///
/// Returns `None` for anything that is not a plain DNS label sequence:
/// empty names, leading dots, empty labels (`..`), path separators, or any
/// character outside `[a-z0-9._-]`.
pub fn storage_key(host: &str) -> Option<String> {
    let host = normalize(host);
    if host.is_empty() || host.starts_with('.') || host.contains("..") {
        return None;
    }
    let valid = host
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'_'));
    valid.then_some(host)
}
