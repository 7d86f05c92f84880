//! Device transport capability.
//!
//! A transport opens a session to one router; a session runs the two
//! operations the commit protocol needs. Sessions are never shared between
//! operations and are closed on every exit path by [`with_session`].

use std::fmt;

use crate::config::RouterTarget;
use crate::credentials::Credentials;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Could not reach the device. Nothing was sent.
    Unreachable(String),
    /// The device refused the credentials. Nothing was sent.
    Auth(String),
    /// The device refused the candidate configuration or the command.
    Rejected(String),
    /// The session died after the commit command may have reached the
    /// device; whether it took effect is unknown.
    LostAfterCommit(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Unreachable(m) => write!(f, "unreachable: {m}"),
            TransportFailure::Auth(m) => write!(f, "authentication failed: {m}"),
            TransportFailure::Rejected(m) => write!(f, "rejected: {m}"),
            TransportFailure::LostAfterCommit(m) => write!(f, "connection lost after commit: {m}"),
        }
    }
}

impl std::error::Error for TransportFailure {}

/// Raw device output for a successful operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub output: String,
}

pub trait DeviceSession {
    /// Enter configuration mode, load `commands`, and commit them with an
    /// automatic rollback after `minutes` unless confirmed.
    fn commit_confirmed(&mut self, commands: &[String], minutes: u32)
        -> Result<Ack, TransportFailure>;

    /// Confirm the pending commit so it is not rolled back.
    fn confirm_commit(&mut self) -> Result<Ack, TransportFailure>;

    fn close(&mut self);
}

pub trait DeviceTransport: Send + Sync {
    fn open(
        &self,
        router: &RouterTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn DeviceSession>, TransportFailure>;
}

/// Closes the wrapped session when dropped.
struct SessionGuard {
    session: Box<dyn DeviceSession>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Open a session, run `f` with it, and close it whatever `f` returns
/// (including unwinding).
pub fn with_session<R>(
    transport: &dyn DeviceTransport,
    router: &RouterTarget,
    credentials: &Credentials,
    f: impl FnOnce(&mut dyn DeviceSession) -> Result<R, TransportFailure>,
) -> Result<R, TransportFailure> {
    let mut guard = SessionGuard {
        session: transport.open(router, credentials)?,
    };
    f(guard.session.as_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    impl DeviceSession for CountingSession {
        fn commit_confirmed(
            &mut self,
            _commands: &[String],
            _minutes: u32,
        ) -> Result<Ack, TransportFailure> {
            Err(TransportFailure::Rejected("syntax error".into()))
        }

        fn confirm_commit(&mut self) -> Result<Ack, TransportFailure> {
            Ok(Ack::default())
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingTransport {
        closed: Arc<AtomicUsize>,
        reachable: bool,
    }

    impl DeviceTransport for CountingTransport {
        fn open(
            &self,
            _router: &RouterTarget,
            _credentials: &Credentials,
        ) -> Result<Box<dyn DeviceSession>, TransportFailure> {
            if !self.reachable {
                return Err(TransportFailure::Unreachable("no route to host".into()));
            }
            Ok(Box::new(CountingSession {
                closed: self.closed.clone(),
            }))
        }
    }

    fn fixtures(reachable: bool) -> (CountingTransport, Arc<AtomicUsize>, RouterTarget, Credentials) {
        let closed = Arc::new(AtomicUsize::new(0));
        (
            CountingTransport {
                closed: closed.clone(),
                reachable,
            },
            closed,
            RouterTarget::new("edge1", "10.0.0.1".parse().unwrap()),
            Credentials {
                username: "ops".into(),
                password: None,
            },
        )
    }

    #[test]
    fn session_closed_on_success() {
        let (transport, closed, router, creds) = fixtures(true);
        with_session(&transport, &router, &creds, |s| s.confirm_commit()).unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn session_closed_on_failure() {
        let (transport, closed, router, creds) = fixtures(true);
        let err = with_session(&transport, &router, &creds, |s| {
            s.commit_confirmed(&["set x".to_string()], 3)
        })
        .unwrap_err();
        assert!(matches!(err, TransportFailure::Rejected(_)));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_never_runs_closure() {
        let (transport, closed, router, creds) = fixtures(false);
        let mut ran = false;
        let err = with_session(&transport, &router, &creds, |_| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, TransportFailure::Unreachable(_)));
        assert!(!ran);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }
}
