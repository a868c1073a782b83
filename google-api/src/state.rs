//! Session state values and the notifications emitted when they change.
//!
//! [`SessionState`] is a small forward-only state machine. The only backwards edge is
//! signing out (`SignedIn -> Loaded`), and `Unavailable` can only be entered when the
//! very first bootstrap attempt fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};

/// The current stage of the identity-provider handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// The provider client library could not be loaded.
    ///
    /// Terminal for the lifetime of the gate that observed it.
    Unavailable,
    /// The library is present, but the client has not been initialized with credentials.
    #[default]
    NeedsLoading,
    /// The client is initialized; nobody is known to be signed in.
    Loaded,
    /// A user session is active.
    SignedIn,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-asserting the current state is always allowed (and is a no-op).
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        self == next
            || matches!(
                (self, next),
                (NeedsLoading, Unavailable)
                    | (NeedsLoading, Loaded)
                    | (Loaded, SignedIn)
                    | (SignedIn, Loaded)
            )
    }

    /// Whether the provider client has been initialized.
    pub fn is_client_ready(self) -> bool {
        matches!(self, Self::Loaded | Self::SignedIn)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::NeedsLoading => write!(f, "needs loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::SignedIn => write!(f, "signed in"),
        }
    }
}

/// The identity of the signed-in user.
///
/// An empty `email` means there is no authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub email: String,
}

impl Profile {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_empty()
    }
}

/// A discrete notification about a change in session state or profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ProfileChanged(String),
}

/// Receives [`SessionEvent`]s from a [`SessionGate`](crate::SessionGate).
///
/// How events reach observers beyond this point is up to the implementor. Delivery must not
/// block: the gate calls `notify` synchronously right after it commits a change.
pub trait SessionSink: Send + Sync {
    fn notify(&self, event: SessionEvent);
}

/// Discards every event.
impl SessionSink for () {
    fn notify(&self, _event: SessionEvent) {}
}

impl SessionSink for mpsc::UnboundedSender<SessionEvent> {
    fn notify(&self, event: SessionEvent) {
        if self.send(event).is_err() {
            tracing::trace!("session event receiver went away");
        }
    }
}

impl SessionSink for broadcast::Sender<SessionEvent> {
    fn notify(&self, event: SessionEvent) {
        // having no subscribers right now is fine
        let _ = self.send(event);
    }
}
