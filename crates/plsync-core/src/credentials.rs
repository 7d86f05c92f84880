//! Credential resolution for device sessions.
//!
//! The controller only sees a [`CredentialProvider`]; interactive prompting
//! lives in the CLI, which wraps one of these providers.

use std::fmt;

use crate::config::RouterTarget;
use crate::error::{PlsyncError, Result};

pub const ENV_USERNAME: &str = "PLSYNC_USERNAME";
pub const ENV_PASSWORD: &str = "PLSYNC_PASSWORD";

/// Legacy variable names honoured after the `PLSYNC_*` ones.
const LEGACY_ENV_USERNAME: &str = "USERNAME";
const LEGACY_ENV_PASSWORD: &str = "PASSWORD";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// `None` means key-based authentication.
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync {
    fn credentials_for(&self, router: &RouterTarget) -> Result<Credentials>;
}

/// Partially-known credentials: what flags, the policy file and the
/// environment supplied, before any prompting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Resolves credentials from, in order: per-router values in the policy
/// file, explicit overrides (CLI flags), then environment variables.
#[derive(Debug, Clone, Default)]
pub struct RouterCredentials {
    overrides: PartialCredentials,
}

impl RouterCredentials {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self {
            overrides: PartialCredentials { username, password },
        }
    }

    pub fn resolve(&self, router: &RouterTarget) -> PartialCredentials {
        let username = router
            .credentials
            .username
            .clone()
            .or_else(|| self.overrides.username.clone())
            .or_else(|| env_non_empty(ENV_USERNAME))
            .or_else(|| env_non_empty(LEGACY_ENV_USERNAME));
        let password = router
            .credentials
            .password
            .clone()
            .or_else(|| self.overrides.password.clone())
            .or_else(|| env_non_empty(ENV_PASSWORD))
            .or_else(|| env_non_empty(LEGACY_ENV_PASSWORD));
        PartialCredentials { username, password }
    }
}

impl CredentialProvider for RouterCredentials {
    fn credentials_for(&self, router: &RouterTarget) -> Result<Credentials> {
        let partial = self.resolve(router);
        let username = partial.username.ok_or_else(|| {
            PlsyncError::Config(format!(
                "no username for {} ({}); set --username or {ENV_USERNAME}",
                router.hostname,
                router.id()
            ))
        })?;
        Ok(Credentials {
            username,
            password: partial.password,
        })
    }
}

/// Fixed credentials for every router.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn credentials_for(&self, _router: &RouterTarget) -> Result<Credentials> {
        Ok(self.0.clone())
    }
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialRef;

    fn router_with(username: Option<&str>, password: Option<&str>) -> RouterTarget {
        let mut r = RouterTarget::new("edge1", "10.0.0.1".parse().unwrap());
        r.credentials = CredentialRef {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
        };
        r
    }

    #[test]
    fn policy_file_values_win_over_overrides() {
        let provider = RouterCredentials::new(Some("flag-user".into()), Some("flag-pw".into()));
        let creds = provider
            .credentials_for(&router_with(Some("file-user"), Some("file-pw")))
            .unwrap();
        assert_eq!(creds.username, "file-user");
        assert_eq!(creds.password.as_deref(), Some("file-pw"));
    }

    #[test]
    fn overrides_fill_missing_parts() {
        let provider = RouterCredentials::new(Some("flag-user".into()), Some("flag-pw".into()));
        let creds = provider
            .credentials_for(&router_with(None, None))
            .unwrap();
        assert_eq!(creds.username, "flag-user");
        assert_eq!(creds.password.as_deref(), Some("flag-pw"));
    }

    #[test]
    fn debug_redacts_password() {
        let creds = Credentials {
            username: "ops".into(),
            password: Some("hunter2".into()),
        };
        let shown = format!("{creds:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("***"));
    }

    #[test]
    fn static_credentials_ignore_router() {
        let provider = StaticCredentials(Credentials {
            username: "ops".into(),
            password: None,
        });
        let creds = provider.credentials_for(&router_with(None, None)).unwrap();
        assert_eq!(creds.username, "ops");
        assert!(creds.password.is_none());
    }
}
