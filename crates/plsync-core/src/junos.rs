//! Junos CLI scripts for the confirmed-commit protocol and classification
//! of the device's textual replies.

/// Junos accepts `commit confirmed` windows of 1..=65535 minutes.
pub const MAX_ROLLBACK_MINUTES: u32 = 65_535;

const ERROR_MARKERS: &[&str] = &[
    "error:",
    "syntax error",
    "unknown command",
    "missing argument",
    "invalid value",
    "commit failed",
    "configuration check-out failed",
    "configuration database modified",
];

const COMMIT_MARKERS: &[&str] = &[
    "commit complete",
    "commit confirmed will be automatically rolled back",
];

const CONFIRM_MARKERS: &[&str] = &["configuration check succeeds", "commit complete"];

/// Commit-confirmed script. `configure exclusive` discards the candidate on
/// exit if the commit never happens, so a half-loaded candidate cannot be
/// picked up by someone else's later commit.
pub fn commit_confirmed_script(commands: &[String], minutes: u32) -> String {
    let mut script = String::from("configure exclusive\n");
    for cmd in commands {
        let cmd = cmd.trim();
        if cmd.is_empty() || cmd.starts_with('#') {
            continue;
        }
        script.push_str(cmd);
        script.push('\n');
    }
    script.push_str(&format!("commit confirmed {minutes}\n"));
    script.push_str("exit configuration-mode\n");
    script
}

/// `commit check` confirms a pending `commit confirmed` without committing
/// anything another user may have staged in the shared candidate.
pub fn confirm_script() -> String {
    "configure\ncommit check\nexit configuration-mode\n".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The device acknowledged the operation.
    Done,
    /// The device reported an error and did not complete the operation.
    Refused(String),
    /// Neither an acknowledgement nor an error was seen.
    Indeterminate,
}

fn first_error_line(output: &str) -> Option<String> {
    output
        .lines()
        .find(|line| {
            let lower = line.to_ascii_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(|line| line.trim().to_string())
}

fn contains_any(output: &str, markers: &[&str]) -> bool {
    let lower = output.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

/// Classify the reply to [`commit_confirmed_script`]. `clean_exit` is
/// whether the session ran to its end.
///
/// A completion marker wins over earlier error lines: once Junos reports
/// the commit, the rollback window is open whatever else it printed. Junos
/// keeps loading after a bad `set` line, so an error line only counts as a
/// refusal when the session also exited cleanly; a cut-off session may have
/// reached the commit.
pub fn classify_commit(output: &str, clean_exit: bool) -> Reply {
    classify(output, COMMIT_MARKERS, clean_exit)
}

/// Classify the reply to [`confirm_script`].
pub fn classify_confirm(output: &str, clean_exit: bool) -> Reply {
    classify(output, CONFIRM_MARKERS, clean_exit)
}

fn classify(output: &str, done_markers: &[&str], clean_exit: bool) -> Reply {
    if contains_any(output, done_markers) {
        return Reply::Done;
    }
    if !clean_exit {
        return Reply::Indeterminate;
    }
    match first_error_line(output) {
        Some(line) => Reply::Refused(line),
        None => Reply::Indeterminate,
    }
}

/// Error lines printed before the commit acknowledgement, for logging.
pub fn load_warnings(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            ERROR_MARKERS.iter().any(|m| lower.contains(m))
        })
        .map(|line| line.trim().to_string())
        .collect()
}
