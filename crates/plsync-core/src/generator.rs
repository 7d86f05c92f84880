//! Prefix-list generation via `bgpq4`.
//!
//! `bgpq4` is invoked in Junos extended mode (`-J -E`) with aggregation
//! (`-A`) and a max-length bound (`-R`). Its output is a
//! `policy-statement` block whose `route-filter` lines are the only part we
//! keep; the device commands are rebuilt from them by the renderer.

use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PolicyDefinition;
use crate::process::{run_with_timeout, ProcessError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Term name used for the accepted prefixes in every rendered policy.
pub const ROUTE_SET_TERM: &str = "route-set1";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("bgpq4 not found on PATH; install bgpq4")]
    NotInstalled,

    #[error("failed to spawn bgpq4: {0}")]
    Spawn(String),

    #[error("bgpq4 timed out after {0}s")]
    Timeout(u64),

    #[error("bgpq4 failed: {0}")]
    Failed(String),

    #[error("bgpq4 returned no route-filter entries for {0}")]
    Empty(String),
}

// ---------------------------------------------------------------------------
// Route filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "length", rename_all = "snake_case")]
pub enum FilterMatch {
    Exact,
    Upto(u8),
}

impl FilterMatch {
    pub fn junos(self) -> String {
        match self {
            FilterMatch::Exact => "exact".to_string(),
            FilterMatch::Upto(len) => format!("upto /{len}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFilter {
    pub prefix: String,
    pub matching: FilterMatch,
}

/// Output of one generator run for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedPrefixList {
    pub policy: String,
    pub as_set: String,
    pub filters: Vec<RouteFilter>,
}

static ROUTE_FILTER_RE: OnceLock<Regex> = OnceLock::new();

fn route_filter_re() -> &'static Regex {
    ROUTE_FILTER_RE.get_or_init(|| {
        Regex::new(r"route-filter (\S+) (exact|upto /(\d+));").expect("static route-filter regex")
    })
}

/// Extract `route-filter` entries from bgpq4 Junos output, in order.
pub fn parse_route_filters(text: &str) -> Vec<RouteFilter> {
    route_filter_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let prefix = caps.get(1)?.as_str().to_string();
            let matching = match caps.get(3) {
                Some(len) => FilterMatch::Upto(len.as_str().parse().ok()?),
                None => FilterMatch::Exact,
            };
            Some(RouteFilter { prefix, matching })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Generator trait
// ---------------------------------------------------------------------------

pub trait PrefixListGenerator: Send + Sync {
    fn generate(
        &self,
        policy: &PolicyDefinition,
    ) -> std::result::Result<GeneratedPrefixList, GenerationError>;
}

// ---------------------------------------------------------------------------
// Bgpq4
// ---------------------------------------------------------------------------

pub struct Bgpq4 {
    binary: PathBuf,
    timeout: Duration,
}

impl Bgpq4 {
    /// Locate `bgpq4` on PATH.
    pub fn detect(timeout: Duration) -> std::result::Result<Self, GenerationError> {
        let binary = which::which("bgpq4").map_err(|_| GenerationError::NotInstalled)?;
        Ok(Self::with_binary(binary, timeout))
    }

    pub fn with_binary(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    /// bgpq4 wants `NAME/route-set1` unless the name already refers to a
    /// route-set or as-set.
    pub fn list_name(policy_name: &str) -> String {
        let lower = policy_name.to_ascii_lowercase();
        if lower.contains("route-set") || lower.contains("as-set") {
            policy_name.to_string()
        } else {
            format!("{policy_name}/{ROUTE_SET_TERM}")
        }
    }

    pub fn args(policy: &PolicyDefinition) -> Vec<String> {
        vec![
            "-S".to_string(),
            policy.rir.as_str().to_string(),
            "-A".to_string(),
            "-J".to_string(),
            "-E".to_string(),
            "-l".to_string(),
            Self::list_name(&policy.name),
            policy.as_set.clone(),
            "-R".to_string(),
            policy.max_prefix_length.to_string(),
            "-M".to_string(),
            "protocol bgp".to_string(),
        ]
    }

    fn run(&self, args: &[String]) -> std::result::Result<String, GenerationError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        let output = run_with_timeout(cmd, None, self.timeout).map_err(|e| match e {
            ProcessError::Timeout { timeout, .. } => GenerationError::Timeout(timeout.as_secs()),
            ProcessError::Spawn { reason, .. } => GenerationError::Spawn(reason),
        })?;

        if !output.status.success() {
            let hint: String = output.stderr.trim().chars().take(500).collect();
            return Err(GenerationError::Failed(hint));
        }
        Ok(output.stdout)
    }
}

impl PrefixListGenerator for Bgpq4 {
    fn generate(
        &self,
        policy: &PolicyDefinition,
    ) -> std::result::Result<GeneratedPrefixList, GenerationError> {
        let args = Self::args(policy);
        info!(policy = %policy.name, as_set = %policy.as_set, rir = %policy.rir, "running bgpq4");
        debug!(command = %format!("{} {}", self.binary.display(), args.join(" ")));

        let stdout = self.run(&args)?;
        let filters = parse_route_filters(&stdout);
        if filters.is_empty() {
            return Err(GenerationError::Empty(policy.as_set.clone()));
        }
        debug!(policy = %policy.name, filters = filters.len(), "bgpq4 output parsed");
        Ok(GeneratedPrefixList {
            policy: policy.name.clone(),
            as_set: policy.as_set.clone(),
            filters,
        })
    }
}
