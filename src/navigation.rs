//! Navigation signals for the presentation layer.
//!
//! The session core never navigates by itself. It emits a [`Navigation`]
//! and whoever renders screens decides what to do with it.

use tokio::sync::broadcast;
use tracing::debug;

/// Where the user should be sent next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    /// Sign-in screen: the session ended or never existed.
    Login,
    /// The user is signed in but lacks the role for what they asked.
    Unauthorized,
    /// Role-specific landing page.
    Home(String),
}

impl std::fmt::Display for Navigation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "/login"),
            Self::Unauthorized => write!(f, "/unauthorized"),
            Self::Home(path) => write!(f, "{path}"),
        }
    }
}

const CHANNEL_CAPACITY: usize = 16;

/// Broadcast sender for [`Navigation`] signals. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Navigator {
    tx: broadcast::Sender<Navigation>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new()
    }
}

impl Navigator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Navigation> {
        self.tx.subscribe()
    }

    /// Emit a signal. Having no listener is fine.
    pub fn emit(&self, navigation: Navigation) {
        debug!(target_path = %navigation, "Navigation requested");
        let _ = self.tx.send(navigation);
    }
}
