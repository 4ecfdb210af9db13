//! Session phase machine.
//!
//! ```text
//! Unauthenticated --LoginStarted------> Authenticating
//! Authenticating  --LoginSucceeded----> Authenticated
//! Authenticating  --LoginFailed-------> Failed --FailureSurfaced--> Unauthenticated
//! Authenticated   --RefreshStarted----> Refreshing
//! Authenticating  --RefreshStarted----> Refreshing      (startup with a stored refresh token)
//! Refreshing      --RefreshSucceeded--> Authenticated
//! Refreshing      --RefreshFailed-----> Unauthenticated
//! Unauthenticated --Restored----------> Authenticated   (startup with a valid access token)
//! any             --Logout------------> Unauthenticated
//! ```
//!
//! The current [`SessionState`] is published on a `watch` channel, so
//! consumers can either read it or await its next change.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::SessionError;
use crate::models::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Refreshing => write!(f, "refreshing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot consumers read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    pub user: Option<UserProfile>,
    pub error: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Unauthenticated,
            user: None,
            error: None,
        }
    }
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.phase == Phase::Authenticated
    }

    /// A login or refresh round trip is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self.phase, Phase::Authenticating | Phase::Refreshing)
    }
}

/// Inputs of the machine.
#[derive(Debug, Clone)]
pub enum Event {
    LoginStarted,
    LoginSucceeded(UserProfile),
    LoginFailed(String),
    /// The failure has been published, fold back to `Unauthenticated`.
    FailureSurfaced,
    RefreshStarted,
    RefreshSucceeded(UserProfile),
    RefreshFailed(String),
    /// Stored credential found valid at startup.
    Restored(UserProfile),
    /// Server-confirmed profile replaces the cached one.
    UserUpdated(UserProfile),
    Logout,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoginStarted => "login_started",
            Self::LoginSucceeded(_) => "login_succeeded",
            Self::LoginFailed(_) => "login_failed",
            Self::FailureSurfaced => "failure_surfaced",
            Self::RefreshStarted => "refresh_started",
            Self::RefreshSucceeded(_) => "refresh_succeeded",
            Self::RefreshFailed(_) => "refresh_failed",
            Self::Restored(_) => "restored",
            Self::UserUpdated(_) => "user_updated",
            Self::Logout => "logout",
        }
    }
}

/// Pure transition function.
pub fn transition(state: &SessionState, event: Event) -> Result<SessionState, SessionError> {
    use Phase::*;

    let next = match (state.phase, event) {
        (_, Event::Logout) => SessionState::default(),

        (Unauthenticated, Event::LoginStarted) => SessionState {
            phase: Authenticating,
            user: None,
            error: None,
        },
        (Authenticating, Event::LoginSucceeded(user)) => SessionState {
            phase: Authenticated,
            user: Some(user),
            error: None,
        },
        (Authenticating, Event::LoginFailed(message)) => SessionState {
            phase: Failed,
            user: None,
            error: Some(message),
        },
        (Failed, Event::FailureSurfaced) => SessionState {
            phase: Unauthenticated,
            user: None,
            error: state.error.clone(),
        },

        (Authenticated | Authenticating, Event::RefreshStarted) => SessionState {
            phase: Refreshing,
            ..state.clone()
        },
        (Refreshing, Event::RefreshSucceeded(user)) => SessionState {
            phase: Authenticated,
            user: Some(user),
            error: None,
        },
        (Refreshing, Event::RefreshFailed(message)) => SessionState {
            phase: Unauthenticated,
            user: None,
            error: Some(message),
        },

        (Unauthenticated, Event::Restored(user)) => SessionState {
            phase: Authenticated,
            user: Some(user),
            error: None,
        },
        (Authenticated, Event::UserUpdated(user)) => SessionState {
            user: Some(user),
            ..state.clone()
        },

        (from, event) => {
            return Err(SessionError::InvalidTransition {
                from,
                event: event.name(),
            });
        }
    };
    Ok(next)
}

/// Holds the published [`SessionState`].
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<SessionState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::default());
        Self { tx }
    }

    /// Apply an event atomically and publish the result.
    pub fn apply(&self, event: Event) -> Result<SessionState, SessionError> {
        let mut outcome = Err(SessionError::NotAuthenticated);
        self.tx.send_if_modified(|state| {
            let from = state.phase;
            let name = event.name();
            match transition(state, event) {
                Ok(next) => {
                    debug!(from = %from, to = %next.phase, event = name, "Session transition");
                    *state = next.clone();
                    outcome = Ok(next);
                    true
                }
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }

    pub fn current(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.tx.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}
