//! Session handling and broadcast/calendar queries against Google.
//!
//! [`SessionGate`] drives the handshake with an [`IdentityProvider`] (load the library,
//! initialize the client, detect or establish a sign-in) and tracks the resulting
//! [`SessionState`]. [`BroadcastCatalog`] uses a ready session to list YouTube live
//! broadcasts, resolve stream keys, and read and update calendar events.
//!
//! [`GoogleApi`] is the provider for Google's HTTP APIs.

pub mod catalog;
pub mod config;
pub mod error;
pub mod google_api;
mod inflight;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod provider;
pub mod session;
pub mod share_info;
pub mod state;

pub use catalog::{BroadcastCatalog, BroadcastRecord, StreamKeySelection};
pub use config::Config;
pub use error::{CatalogError, SessionError};
pub use google_api::GoogleApi;
pub use provider::IdentityProvider;
pub use session::SessionGate;
pub use share_info::{DescriptionBuilder, ShareInfoText};
pub use state::{Profile, SessionEvent, SessionSink, SessionState};

/// Wires up a Google-backed session and a catalog on top of it.
///
/// Nothing is loaded yet; call [`SessionGate::load`] with `config.client_id` to start.
pub fn setup_google(
    config: Config,
    sink: impl SessionSink + 'static,
) -> BroadcastCatalog<GoogleApi> {
    let dial_in_numbers_url = config.dial_in_numbers_url.clone();
    let gate = SessionGate::with_sink(GoogleApi::new(config), sink);
    BroadcastCatalog::new(gate).with_dial_in_numbers_url(dial_in_numbers_url)
}
