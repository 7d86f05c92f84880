//! Interactive credential fallback.

use std::io::{BufRead, IsTerminal, Write};
use std::sync::{Mutex, PoisonError};

use plsync_core::config::RouterTarget;
use plsync_core::credentials::{CredentialProvider, Credentials, RouterCredentials};
use plsync_core::error::{PlsyncError, Result};

/// Asks on the terminal for whatever `inner` could not supply. Answers are
/// reused for every later router, and only one prompt runs at a time.
pub struct PromptingCredentials {
    inner: RouterCredentials,
    interactive: bool,
    answers: Mutex<Answers>,
}

#[derive(Default)]
struct Answers {
    username: Option<String>,
    /// `Some(None)`: asked, and the operator chose key-based auth.
    password: Option<Option<String>>,
}

impl PromptingCredentials {
    pub fn new(inner: RouterCredentials) -> Self {
        Self {
            inner,
            interactive: std::io::stdin().is_terminal(),
            answers: Mutex::new(Answers::default()),
        }
    }
}

impl CredentialProvider for PromptingCredentials {
    fn credentials_for(&self, router: &RouterTarget) -> Result<Credentials> {
        let known = self.inner.resolve(router);
        if !self.interactive || (known.username.is_some() && known.password.is_some()) {
            return self.inner.credentials_for(router);
        }

        let mut answers = self.answers.lock().unwrap_or_else(PoisonError::into_inner);
        let username = match known.username {
            Some(u) => u,
            None => match &answers.username {
                Some(u) => u.clone(),
                None => {
                    let u = ask_line(&format!("Username for {}: ", router.hostname))?;
                    if u.is_empty() {
                        return Err(PlsyncError::Config("empty username".into()));
                    }
                    answers.username = Some(u.clone());
                    u
                }
            },
        };
        let password = match known.password {
            Some(p) => Some(p),
            None => match &answers.password {
                Some(p) => p.clone(),
                None => {
                    let p = rpassword::prompt_password("Password (empty for key-based auth): ")?;
                    let p = Some(p).filter(|p| !p.is_empty());
                    answers.password = Some(p.clone());
                    p
                }
            },
        };
        Ok(Credentials { username, password })
    }
}

fn ask_line(prompt: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    stderr.write_all(prompt.as_bytes())?;
    stderr.flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
