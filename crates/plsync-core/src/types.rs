use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// CommitState
// ---------------------------------------------------------------------------

/// Confirmation state of a commit on one router.
///
/// `Pending → Confirmed | RolledBack`; `Unknown` when the acknowledgement of
/// a commit was lost and only an operator can tell what the device did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    Confirmed,
    RolledBack,
    Unknown,
}

impl CommitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Confirmed => "confirmed",
            CommitState::RolledBack => "rolled_back",
            CommitState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommitState {
    type Err = crate::error::PlsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommitState::Pending),
            "confirmed" => Ok(CommitState::Confirmed),
            "rolled_back" | "rolled-back" => Ok(CommitState::RolledBack),
            "unknown" => Ok(CommitState::Unknown),
            _ => Err(crate::error::PlsyncError::Config(format!(
                "invalid commit state: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Rir
// ---------------------------------------------------------------------------

/// Routing registry queried by the prefix-list generator (`bgpq4 -S`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rir {
    #[default]
    Afrinic,
    Apnic,
    Arin,
    Lacnic,
    Ripe,
    Radb,
    Nttcom,
    Altdb,
    Level3,
}

impl Rir {
    pub fn all() -> &'static [Rir] {
        &[
            Rir::Afrinic,
            Rir::Apnic,
            Rir::Arin,
            Rir::Lacnic,
            Rir::Ripe,
            Rir::Radb,
            Rir::Nttcom,
            Rir::Altdb,
            Rir::Level3,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rir::Afrinic => "AFRINIC",
            Rir::Apnic => "APNIC",
            Rir::Arin => "ARIN",
            Rir::Lacnic => "LACNIC",
            Rir::Ripe => "RIPE",
            Rir::Radb => "RADB",
            Rir::Nttcom => "NTTCOM",
            Rir::Altdb => "ALTDB",
            Rir::Level3 => "LEVEL3",
        }
    }
}

impl fmt::Display for Rir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Rir {
    type Err = crate::error::PlsyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Rir::all()
            .iter()
            .copied()
            .find(|r| r.as_str() == upper)
            .ok_or_else(|| crate::error::PlsyncError::Config(format!("unknown RIR: {s}")))
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Failure taxonomy surfaced in per-router reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Generation,
    Transport,
    CommitRejected,
    CommitInProgress,
    PartialApplyUnknown,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::Generation => "GenerationError",
            ErrorKind::Transport => "TransportError",
            ErrorKind::CommitRejected => "CommitRejected",
            ErrorKind::CommitInProgress => "CommitInProgress",
            ErrorKind::PartialApplyUnknown => "PartialApplyUnknown",
            ErrorKind::Internal => "InternalError",
        }
    }

    /// Outcomes that need an operator to look at the device, reported at
    /// warning severity rather than as ordinary failures.
    pub fn needs_attention(self) -> bool {
        matches!(self, ErrorKind::PartialApplyUnknown)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_state_roundtrip() {
        for state in [
            CommitState::Pending,
            CommitState::Confirmed,
            CommitState::RolledBack,
            CommitState::Unknown,
        ] {
            let parsed: CommitState = state.as_str().parse().unwrap();
            assert_eq!(parsed, state);
        }
    }

    #[test]
    fn commit_state_serde_snake_case() {
        let json = serde_json::to_string(&CommitState::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
    }

    #[test]
    fn rir_parse_is_case_insensitive() {
        assert_eq!("ripe".parse::<Rir>().unwrap(), Rir::Ripe);
        assert_eq!(" ARIN ".parse::<Rir>().unwrap(), Rir::Arin);
        assert!("NOPE".parse::<Rir>().is_err());
    }

    #[test]
    fn rir_yaml_is_uppercase() {
        let rir: Rir = serde_yaml::from_str("RIPE").unwrap();
        assert_eq!(rir, Rir::Ripe);
        assert_eq!(Rir::default(), Rir::Afrinic);
    }

    #[test]
    fn only_unknown_outcome_needs_attention() {
        assert!(ErrorKind::PartialApplyUnknown.needs_attention());
        assert!(!ErrorKind::Transport.needs_attention());
        assert_eq!(ErrorKind::CommitInProgress.to_string(), "CommitInProgress");
    }
}
