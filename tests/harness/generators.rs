// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Hostname generators for storm simulation.

/// Hostnames that alias the canonical host.
pub fn generate_aliased_hosts(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("mta-sts.domain-{i}.example.com"))
        .collect()
}

/// Hostnames an attacker might point at the service without owning a
/// matching CNAME.
pub fn generate_foreign_hosts(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("random-{i}.attacker.example"))
        .collect()
}

/// Hostnames crafted to escape the attempt store directory.
pub fn generate_hostile_hosts() -> Vec<&'static str> {
    vec![
        "../../etc/passwd",
        "..",
        "mta-sts.example.com/../../x",
        "mta-sts\\example.com",
        "nul\0.example.com",
        "",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_hosts_unique() {
        let hosts = generate_aliased_hosts(100);
        let unique: std::collections::HashSet<_> = hosts.iter().collect();
        assert_eq!(unique.len(), 100);
    }
}
