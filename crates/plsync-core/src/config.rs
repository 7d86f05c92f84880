//! Policy source: the YAML file listing routers and their prefix-list
//! policies, plus global defaults.
//!
//! ```yaml
//! routers:
//!   - hostname: edge1
//!     ip: 192.168.1.1
//!     policies:
//!       - name: CUSTOMER-A
//!         as_set: AS12345
//!         rir: RIPE
//!         max_prefix_length: 24
//! global:
//!   default_rir: AFRINIC
//!   default_max_prefix_length: 24
//! ```

use crate::error::{PlsyncError, Result};
use crate::paths;
use crate::types::Rir;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::OnceLock;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const PREFIX_LENGTH_RANGE: RangeInclusive<u8> = 8..=32;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn error(message: String) -> Self {
        Self {
            level: WarnLevel::Error,
            message,
        }
    }

    fn warning(message: String) -> Self {
        Self {
            level: WarnLevel::Warning,
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw YAML shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub default_rir: Rir,
    #[serde(default = "default_max_prefix_length")]
    pub default_max_prefix_length: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

fn default_max_prefix_length() -> u8 {
    24
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_rir: Rir::default(),
            default_max_prefix_length: default_max_prefix_length(),
            log_level: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub as_set: Option<String>,
    #[serde(default)]
    pub rir: Option<Rir>,
    #[serde(default)]
    pub max_prefix_length: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterEntry {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub policies: Vec<PolicyEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default)]
    pub routers: Option<Vec<RouterEntry>>,
    #[serde(default)]
    pub global: GlobalConfig,
}

// ---------------------------------------------------------------------------
// Resolved model
// ---------------------------------------------------------------------------

/// Credentials as written in the policy file; either part may be absent and
/// filled in later by a credential provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialRef {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// A managed router. The management address is its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterTarget {
    pub hostname: String,
    pub ip: IpAddr,
    pub port: u16,
    pub credentials: CredentialRef,
}

impl RouterTarget {
    pub fn new(hostname: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            hostname: hostname.into(),
            ip,
            port: DEFAULT_SSH_PORT,
            credentials: CredentialRef::default(),
        }
    }

    /// Key used by the pending-commit store and in reports.
    pub fn id(&self) -> String {
        self.ip.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDefinition {
    pub name: String,
    pub as_set: String,
    pub rir: Rir,
    pub max_prefix_length: u8,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RouterPolicies {
    pub router: RouterTarget,
    pub policies: Vec<PolicyDefinition>,
}

/// Validated, defaults-applied view of a policy file, in file order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub routers: Vec<RouterPolicies>,
}

impl Inventory {
    /// Look a router up by management address or hostname.
    pub fn find(&self, key: &str) -> Option<&RouterTarget> {
        self.routers
            .iter()
            .map(|rp| &rp.router)
            .find(|r| r.id() == key || r.hostname == key)
    }
}

// ---------------------------------------------------------------------------
// AS-SET validation
// ---------------------------------------------------------------------------

static AS_SET_RE: OnceLock<Regex> = OnceLock::new();

fn as_set_re() -> &'static Regex {
    AS_SET_RE.get_or_init(|| {
        Regex::new(r"(?i)^AS[0-9A-Z:_.\-]*[0-9A-Z]$").expect("static as-set regex")
    })
}

// ---------------------------------------------------------------------------
// Load / validate / resolve
// ---------------------------------------------------------------------------

impl PolicyFile {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlsyncError::PolicyFileNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let file: PolicyFile = serde_yaml::from_str(data)?;
        Ok(file)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let Some(routers) = &self.routers else {
            warnings.push(ConfigWarning::error(
                "missing 'routers' section in policy file".to_string(),
            ));
            return warnings;
        };

        if !PREFIX_LENGTH_RANGE.contains(&self.global.default_max_prefix_length) {
            warnings.push(ConfigWarning::error(format!(
                "global default_max_prefix_length {} outside {}..={}",
                self.global.default_max_prefix_length,
                PREFIX_LENGTH_RANGE.start(),
                PREFIX_LENGTH_RANGE.end()
            )));
        }

        let mut seen_ips = HashSet::new();
        for (idx, router) in routers.iter().enumerate() {
            let label = router
                .hostname
                .clone()
                .or_else(|| router.ip.clone())
                .unwrap_or_else(|| format!("routers[{idx}]"));

            match (&router.hostname, &router.ip) {
                (Some(h), Some(_)) if h.trim().is_empty() => {
                    warnings.push(ConfigWarning::error(format!(
                        "router '{label}' has an empty hostname"
                    )));
                }
                (Some(_), Some(ip)) => match ip.parse::<IpAddr>() {
                    Ok(addr) => {
                        if !seen_ips.insert(addr) {
                            warnings.push(ConfigWarning::error(format!(
                                "duplicate router address {addr}"
                            )));
                        }
                    }
                    Err(_) => warnings.push(ConfigWarning::error(format!(
                        "router '{label}' has an invalid ip '{ip}'"
                    ))),
                },
                _ => warnings.push(ConfigWarning::error(format!(
                    "router '{label}' is missing hostname or ip"
                ))),
            }

            if router.port == Some(0) {
                warnings.push(ConfigWarning::error(format!(
                    "router '{label}' has port 0"
                )));
            }

            if router.policies.is_empty() {
                warnings.push(ConfigWarning::warning(format!(
                    "router '{label}' has no policies"
                )));
            }

            let mut seen_names = HashSet::new();
            for (pidx, policy) in router.policies.iter().enumerate() {
                let (Some(name), Some(as_set)) = (&policy.name, &policy.as_set) else {
                    warnings.push(ConfigWarning::error(format!(
                        "router '{label}' policies[{pidx}] is missing name or as_set"
                    )));
                    continue;
                };
                if let Err(e) = paths::validate_policy_name(name) {
                    warnings.push(ConfigWarning::error(format!("router '{label}': {e}")));
                }
                if !seen_names.insert(name.as_str()) {
                    warnings.push(ConfigWarning::error(format!(
                        "router '{label}' defines policy '{name}' more than once"
                    )));
                }
                if !as_set_re().is_match(as_set) {
                    warnings.push(ConfigWarning::error(format!(
                        "policy '{name}' on '{label}' has invalid as_set '{as_set}'"
                    )));
                }
                if let Some(len) = policy.max_prefix_length {
                    if !PREFIX_LENGTH_RANGE.contains(&len) {
                        warnings.push(ConfigWarning::error(format!(
                            "policy '{name}' on '{label}' has max_prefix_length {len} outside {}..={}",
                            PREFIX_LENGTH_RANGE.start(),
                            PREFIX_LENGTH_RANGE.end()
                        )));
                    }
                }
            }
        }

        warnings
    }

    /// Validate and apply global defaults. Any error-level finding aborts
    /// with a `Config` error naming every problem, before any device is touched.
    pub fn resolve(&self) -> Result<Inventory> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if !errors.is_empty() {
            return Err(PlsyncError::Config(errors.join("; ")));
        }

        let mut inventory = Inventory::default();
        for router in self.routers.iter().flatten() {
            let (Some(hostname), Some(ip)) = (&router.hostname, &router.ip) else {
                continue;
            };
            let ip: IpAddr = ip
                .parse()
                .map_err(|_| PlsyncError::Config(format!("invalid ip '{ip}'")))?;
            let target = RouterTarget {
                hostname: hostname.clone(),
                ip,
                port: router.port.unwrap_or(DEFAULT_SSH_PORT),
                credentials: CredentialRef {
                    username: router.username.clone(),
                    password: router.password.clone(),
                },
            };
            let policies = router
                .policies
                .iter()
                .filter_map(|p| {
                    Some(PolicyDefinition {
                        name: p.name.clone()?,
                        as_set: p.as_set.clone()?,
                        rir: p.rir.unwrap_or(self.global.default_rir),
                        max_prefix_length: p
                            .max_prefix_length
                            .unwrap_or(self.global.default_max_prefix_length),
                        description: p.description.clone(),
                    })
                })
                .collect();
            inventory.routers.push(RouterPolicies {
                router: target,
                policies,
            });
        }
        Ok(inventory)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
routers:
  - hostname: test-router
    ip: 10.0.0.1
    policies:
      - name: TEST-ROUTES
        as_set: AS65530
        description: Test Routes
        max_prefix_length: 24
        rir: RIPE
      - name: DEFAULTS
        as_set: AS-EXAMPLE
global:
  default_rir: ARIN
  default_max_prefix_length: 23
  log_level: INFO
"#;

    #[test]
    fn resolve_applies_global_defaults() {
        let inv = PolicyFile::parse(SAMPLE).unwrap().resolve().unwrap();
        assert_eq!(inv.routers.len(), 1);
        let rp = &inv.routers[0];
        assert_eq!(rp.router.hostname, "test-router");
        assert_eq!(rp.router.id(), "10.0.0.1");
        assert_eq!(rp.router.port, DEFAULT_SSH_PORT);

        assert_eq!(rp.policies[0].rir, Rir::Ripe);
        assert_eq!(rp.policies[0].max_prefix_length, 24);
        assert_eq!(rp.policies[1].rir, Rir::Arin);
        assert_eq!(rp.policies[1].max_prefix_length, 23);
    }

    #[test]
    fn missing_global_uses_builtin_defaults() {
        let yaml = "routers:\n  - hostname: r1\n    ip: 10.0.0.2\n    policies:\n      - name: P\n        as_set: AS1\n";
        let inv = PolicyFile::parse(yaml).unwrap().resolve().unwrap();
        let p = &inv.routers[0].policies[0];
        assert_eq!(p.rir, Rir::Afrinic);
        assert_eq!(p.max_prefix_length, 24);
    }

    #[test]
    fn missing_routers_section_is_config_error() {
        let err = PolicyFile::parse("global: {}\n")
            .unwrap()
            .resolve()
            .unwrap_err();
        assert!(matches!(err, PlsyncError::Config(ref m) if m.contains("routers")));
    }

    #[test]
    fn router_without_ip_is_error() {
        let file = PolicyFile::parse("routers:\n  - hostname: r1\n").unwrap();
        let warnings = file.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("missing hostname or ip")));
    }

    #[test]
    fn invalid_ip_and_duplicate_address_are_errors() {
        let yaml = r#"
routers:
  - { hostname: a, ip: 10.0.0.1, policies: [{ name: P, as_set: AS1 }] }
  - { hostname: b, ip: 10.0.0.1, policies: [{ name: P, as_set: AS1 }] }
  - { hostname: c, ip: not-an-ip, policies: [{ name: P, as_set: AS1 }] }
"#;
        let warnings = PolicyFile::parse(yaml).unwrap().validate();
        assert!(warnings.iter().any(|w| w.message.contains("duplicate")));
        assert!(warnings.iter().any(|w| w.message.contains("invalid ip")));
    }

    #[test]
    fn policy_problems_are_reported_together() {
        let yaml = r#"
routers:
  - hostname: r1
    ip: 10.0.0.1
    policies:
      - { name: GOOD, as_set: AS1 }
      - { name: GOOD, as_set: AS2 }
      - { name: BAD, as_set: "rm -rf" }
      - { name: LONG, as_set: AS3, max_prefix_length: 33 }
      - { as_set: AS4 }
"#;
        let err = PolicyFile::parse(yaml).unwrap().resolve().unwrap_err();
        let PlsyncError::Config(msg) = err else {
            panic!("expected config error");
        };
        assert!(msg.contains("more than once"), "{msg}");
        assert!(msg.contains("invalid as_set"), "{msg}");
        assert!(msg.contains("max_prefix_length 33"), "{msg}");
        assert!(msg.contains("missing name or as_set"), "{msg}");
    }

    #[test]
    fn router_without_policies_is_only_a_warning() {
        let yaml = "routers:\n  - hostname: r1\n    ip: 10.0.0.1\n";
        let file = PolicyFile::parse(yaml).unwrap();
        let warnings = file.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Warning);
        assert!(file.resolve().is_ok());
    }

    #[test]
    fn unknown_rir_fails_to_parse() {
        let yaml = "routers:\n  - hostname: r1\n    ip: 10.0.0.1\n    policies:\n      - { name: P, as_set: AS1, rir: MARS }\n";
        assert!(PolicyFile::parse(yaml).is_err());
    }

    #[test]
    fn inventory_find_by_ip_or_hostname() {
        let inv = PolicyFile::parse(SAMPLE).unwrap().resolve().unwrap();
        assert!(inv.find("10.0.0.1").is_some());
        assert!(inv.find("test-router").is_some());
        assert!(inv.find("10.9.9.9").is_none());
    }

    #[test]
    fn credentials_and_port_carry_through() {
        let yaml = "routers:\n  - { hostname: r1, ip: 10.0.0.1, port: 2222, username: ops, password: s3cret, policies: [] }\n";
        let inv = PolicyFile::parse(yaml).unwrap().resolve().unwrap();
        let r = &inv.routers[0].router;
        assert_eq!(r.port, 2222);
        assert_eq!(r.credentials.username.as_deref(), Some("ops"));
        assert_eq!(r.credentials.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn load_missing_file() {
        let err = PolicyFile::load(Path::new("/nonexistent/prefix_policies.yaml")).unwrap_err();
        assert!(matches!(err, PlsyncError::PolicyFileNotFound(_)));
    }
}
