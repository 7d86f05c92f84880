//! Renders generated prefix lists into Junos `set` commands.
//!
//! Rendering is a pure function of its inputs: the digest covers the command
//! text only, so the same router/policies/prefixes always produce the same
//! digest regardless of when they were rendered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{PolicyDefinition, RouterTarget};
use crate::error::Result;
use crate::generator::{GeneratedPrefixList, ROUTE_SET_TERM};
use crate::{io, paths};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedConfiguration {
    pub router: String,
    pub hostname: String,
    /// One line per command; `#` lines are annotations, never sent.
    pub lines: Vec<String>,
    pub digest: String,
    pub generated_at: DateTime<Utc>,
    /// Policies that made it into `lines`, in order.
    pub policies: Vec<String>,
}

impl RenderedConfiguration {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn device_commands(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|l| !l.trim_start().starts_with('#'))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Short digest prefix for log lines and tables.
    pub fn short_digest(&self) -> &str {
        &self.digest[..self.digest.len().min(12)]
    }
}

pub fn digest_text(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn policy_lines(policy: &PolicyDefinition, generated: &GeneratedPrefixList) -> Vec<String> {
    let base = format!("set policy-options policy-statement {}", policy.name);
    let mut lines = Vec::with_capacity(generated.filters.len() + 4);
    lines.push(format!(
        "# BGP Prefix List for {} ({})",
        policy.name, policy.as_set
    ));
    lines.push(format!("{base} term {ROUTE_SET_TERM} from protocol bgp"));
    for filter in &generated.filters {
        lines.push(format!(
            "{base} term {ROUTE_SET_TERM} from route-filter {} {}",
            filter.prefix,
            filter.matching.junos()
        ));
    }
    lines.push(format!("{base} term {ROUTE_SET_TERM} then next policy"));
    lines.push(format!("{base} term reject then reject"));
    lines
}

/// Combine a router's policies with their generated prefix lists.
///
/// Policies are emitted in definition order. A policy with no generated list
/// (its generation failed) is left out; the caller reports it.
pub fn render(
    router: &RouterTarget,
    policies: &[PolicyDefinition],
    generated: &[GeneratedPrefixList],
    generated_at: DateTime<Utc>,
) -> RenderedConfiguration {
    let by_name: HashMap<&str, &GeneratedPrefixList> =
        generated.iter().map(|g| (g.policy.as_str(), g)).collect();

    let mut lines = Vec::new();
    let mut included = Vec::new();
    for policy in policies {
        let Some(list) = by_name.get(policy.name.as_str()) else {
            continue;
        };
        lines.extend(policy_lines(policy, list));
        included.push(policy.name.clone());
    }

    let digest = digest_text(&lines.join("\n"));
    RenderedConfiguration {
        router: router.id(),
        hostname: router.hostname.clone(),
        lines,
        digest,
        generated_at,
        policies: included,
    }
}

/// Write the dry-run file for one router and return its path.
pub fn write_generated(dir: &Path, rendered: &RenderedConfiguration) -> Result<PathBuf> {
    let stamp = rendered.generated_at.format("%Y%m%d_%H%M%S").to_string();
    let path = paths::generated_config_path(dir, &rendered.hostname, &stamp);

    let mut body = String::new();
    body.push_str(&format!("# Generated: {}\n", rendered.generated_at.to_rfc3339()));
    body.push_str(&format!(
        "# Router: {} ({})\n",
        rendered.hostname, rendered.router
    ));
    body.push_str(&format!("# Digest: {}\n\n", rendered.digest));
    body.push_str(&rendered.text());
    body.push('\n');

    io::atomic_write(&path, body.as_bytes())?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{FilterMatch, RouteFilter};
    use crate::types::Rir;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn router() -> RouterTarget {
        RouterTarget::new("edge1", "192.168.1.1".parse().unwrap())
    }

    fn customer_a() -> (PolicyDefinition, GeneratedPrefixList) {
        (
            PolicyDefinition {
                name: "CUSTOMER-A".into(),
                as_set: "AS12345".into(),
                rir: Rir::Ripe,
                max_prefix_length: 24,
                description: Some("Customer A".into()),
            },
            GeneratedPrefixList {
                policy: "CUSTOMER-A".into(),
                as_set: "AS12345".into(),
                filters: vec![
                    RouteFilter {
                        prefix: "192.0.2.0/24".into(),
                        matching: FilterMatch::Exact,
                    },
                    RouteFilter {
                        prefix: "198.51.100.0/22".into(),
                        matching: FilterMatch::Upto(24),
                    },
                ],
            },
        )
    }

    #[test]
    fn renders_junos_set_commands() {
        let (policy, list) = customer_a();
        let out = render(&router(), &[policy], &[list], Utc::now());
        assert_eq!(
            out.lines,
            vec![
                "# BGP Prefix List for CUSTOMER-A (AS12345)",
                "set policy-options policy-statement CUSTOMER-A term route-set1 from protocol bgp",
                "set policy-options policy-statement CUSTOMER-A term route-set1 from route-filter 192.0.2.0/24 exact",
                "set policy-options policy-statement CUSTOMER-A term route-set1 from route-filter 198.51.100.0/22 upto /24",
                "set policy-options policy-statement CUSTOMER-A term route-set1 then next policy",
                "set policy-options policy-statement CUSTOMER-A term reject then reject",
            ]
        );
        assert_eq!(out.device_commands().len(), 5);
        assert_eq!(out.router, "192.168.1.1");
    }

    #[test]
    fn rendering_is_deterministic_across_time() {
        let (policy, list) = customer_a();
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let a = render(&router(), &[policy.clone()], &[list.clone()], t1);
        let b = render(&router(), &[policy], &[list], t2);
        assert_eq!(a.text().as_bytes(), b.text().as_bytes());
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }

    #[test]
    fn digest_changes_with_prefixes() {
        let (policy, mut list) = customer_a();
        let a = render(&router(), &[policy.clone()], &[list.clone()], Utc::now());
        list.filters.pop();
        let b = render(&router(), &[policy], &[list], Utc::now());
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn policies_without_generated_list_are_skipped() {
        let (policy, list) = customer_a();
        let mut orphan = policy.clone();
        orphan.name = "ORPHAN".into();
        let out = render(&router(), &[orphan, policy], &[list], Utc::now());
        assert_eq!(out.policies, vec!["CUSTOMER-A".to_string()]);
        assert!(!out.is_empty());
    }

    #[test]
    fn write_generated_uses_hostname_and_stamp() {
        let dir = TempDir::new().unwrap();
        let (policy, list) = customer_a();
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let out = render(&router(), &[policy], &[list], at);
        let path = write_generated(dir.path(), &out).unwrap();
        assert!(path.ends_with("edge1_20250304_050607.conf"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("# Generated: "));
        assert!(body.contains("# Router: edge1 (192.168.1.1)"));
        assert!(body.contains("route-filter 192.0.2.0/24 exact"));
    }
}
