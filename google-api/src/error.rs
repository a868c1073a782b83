//! Error kinds surfaced by the session gate and the broadcast catalog.
//!
//! Provider failures are opaque [`eyre::Report`]s. They get wrapped into one of the kinds
//! below so that callers can decide on a retry policy by matching on the variant, while the
//! original report stays reachable through [`std::error::Error::source`].

use crate::state::SessionState;
use std::sync::Arc;

/// A provider error that may be observed by several callers at once.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

pub(crate) fn shared(report: eyre::Report) -> SharedError {
    let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = report.into();
    Arc::from(boxed)
}

/// Failures of [`SessionGate`](crate::SessionGate) operations.
///
/// Clone-able since coalesced callers all receive the outcome of the same attempt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    /// Bootstrap never succeeded; the provider library could not be loaded.
    #[error("identity provider library is unavailable")]
    ProviderUnavailable(#[source] SharedError),
    #[error("failed to initialize identity provider client")]
    Initialization(#[source] SharedError),
    /// Interactive or silent sign-in (or sign-out) failed.
    #[error("failed to authenticate with identity provider")]
    Authentication(#[source] SharedError),
    #[error("failed to fetch user profile")]
    ProfileFetch(#[source] SharedError),
}

/// Failures of [`BroadcastCatalog`](crate::BroadcastCatalog) operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Bootstrap failed, or the provider client has not been initialized yet.
    #[error("session is not ready (state: {state})")]
    NotReady {
        state: SessionState,
        #[source]
        source: Option<SessionError>,
    },
    /// The upstream service failed (network, quota, undecodable payload, ...).
    #[error("remote query failed")]
    RemoteQuery(#[source] SharedError),
    /// A structurally required part of the response was missing.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
    #[error("a bound stream id is required to resolve a stream key")]
    EmptyBoundStreamId,
}

impl CatalogError {
    pub(crate) fn remote(report: eyre::Report) -> Self {
        Self::RemoteQuery(shared(report))
    }
}
