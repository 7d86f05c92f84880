use crate::error::{PlsyncError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const POLICY_FILE: &str = "configs/prefix_policies.yaml";
pub const GENERATED_DIR: &str = "configs/generated";
pub const STATE_DIR: &str = ".plsync";
pub const LOG_DIR: &str = "logs";

pub const COMMITS_DB: &str = "commits.redb";
pub const LOG_FILE: &str = "plsync.log";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn commits_db_path(state_dir: &Path) -> PathBuf {
    state_dir.join(COMMITS_DB)
}

pub fn log_file_path(log_dir: &Path) -> PathBuf {
    log_dir.join(LOG_FILE)
}

/// `<dir>/<hostname>_<stamp>.conf`, where `stamp` is `YYYYmmdd_HHMMSS`.
pub fn generated_config_path(dir: &Path, hostname: &str, stamp: &str) -> PathBuf {
    dir.join(format!("{hostname}_{stamp}.conf"))
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static POLICY_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn policy_name_re() -> &'static Regex {
    POLICY_NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("static policy-name regex")
    })
}

/// Policy names end up verbatim in `set policy-options policy-statement NAME`
/// and in the generated file name, so only a conservative charset is allowed.
pub fn validate_policy_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 || !policy_name_re().is_match(name) {
        return Err(PlsyncError::Config(format!(
            "invalid policy name '{name}': use letters, digits, '-', '_' or '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_policy_names() {
        for name in ["CUSTOMER-A", "TEST-ROUTES", "as65530_in", "peer.v4"] {
            validate_policy_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_policy_names() {
        for name in ["", "-leading", "has space", "semi;colon", "a/route-set1"] {
            assert!(validate_policy_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn path_helpers() {
        let state = Path::new("/srv/plsync/.plsync");
        assert_eq!(
            commits_db_path(state),
            PathBuf::from("/srv/plsync/.plsync/commits.redb")
        );
        assert_eq!(
            generated_config_path(Path::new("out"), "edge1", "20250102_030405"),
            PathBuf::from("out/edge1_20250102_030405.conf")
        );
    }
}
