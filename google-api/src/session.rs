//! The session gate: lifecycle of the connection to the identity provider.
//!
//! Loading happens in stages (library, then client, then detecting an existing sign-in), and
//! any of them may be requested by several callers at once. Bootstrap and client
//! initialization are coalesced so that the provider only ever does that work once, and all
//! state changes go through [`SessionState::can_transition_to`].

use crate::error::{SessionError, shared};
use crate::inflight::{Attempt, InFlight};
use crate::provider::IdentityProvider;
use crate::state::{Profile, SessionEvent, SessionSink, SessionState};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::instrument;

type Outcome = Result<(), SessionError>;

struct Inner<P> {
    provider: P,
    state: watch::Sender<SessionState>,
    profile: watch::Sender<Profile>,
    sink: Box<dyn SessionSink>,
    bootstrap: InFlight<Outcome>,
    initialize: InFlight<Outcome>,
    sign_in: InFlight<Outcome>,
}

impl<P> Inner<P> {
    /// Moves to `next` and notifies the sink, unless the gate is already there.
    fn transition(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            if !state.can_transition_to(next) {
                tracing::warn!(from = %state, to = %next, "ignoring illegal session transition");
                return false;
            }
            tracing::info!(from = %state, to = %next, "session state changed");
            *state = next;
            true
        });
        if changed {
            self.sink.notify(SessionEvent::StateChanged(next));
        }
    }

    fn set_profile(&self, profile: Profile) {
        let email = profile.email.clone();
        if self.profile.send_if_modified(|current| {
            if *current == profile {
                return false;
            }
            *current = profile;
            true
        }) {
            tracing::debug!(%email, "profile changed");
            self.sink.notify(SessionEvent::ProfileChanged(email));
        }
    }
}

impl<P> Inner<P>
where
    P: IdentityProvider + 'static,
{
    /// The one bootstrap attempt of this gate, started on first use.
    fn bootstrap(self: &Arc<Self>) -> Attempt<Outcome> {
        self.bootstrap.join_or_start(|| {
            let inner = Arc::clone(self);
            async move {
                match inner.provider.load_library().await {
                    Ok(()) => {
                        tracing::debug!("identity provider library loaded");
                        Ok(())
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "identity provider library failed to load");
                        inner.transition(SessionState::Unavailable);
                        Err(SessionError::ProviderUnavailable(shared(e)))
                    }
                }
            }
            .boxed()
        })
    }
}

/// Owns the session with one identity provider.
///
/// Cheap to clone; clones share the same session.
pub struct SessionGate<P> {
    inner: Arc<Inner<P>>,
}

impl<P> Clone for SessionGate<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> std::fmt::Debug for SessionGate<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGate")
            .field("state", &*self.inner.state.borrow())
            .field("profile", &*self.inner.profile.borrow())
            .field("bootstrap", &self.inner.bootstrap)
            .finish_non_exhaustive()
    }
}

impl<P> SessionGate<P>
where
    P: IdentityProvider + 'static,
{
    /// A gate whose notifications go nowhere; use the `subscribe_*` methods to observe it.
    pub fn new(provider: P) -> Self {
        Self::with_sink(provider, ())
    }

    pub fn with_sink(provider: P, sink: impl SessionSink + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                state: watch::Sender::new(SessionState::default()),
                profile: watch::Sender::new(Profile::default()),
                sink: Box::new(sink),
                bootstrap: InFlight::new(),
                initialize: InFlight::new(),
                sign_in: InFlight::new(),
            }),
        }
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn profile(&self) -> Profile {
        self.inner.profile.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_profile(&self) -> watch::Receiver<Profile> {
        self.inner.profile.subscribe()
    }

    /// Loads the provider library, once.
    ///
    /// Every caller, concurrent or later, observes the outcome of that one attempt. A failure
    /// is permanent and leaves the gate [`SessionState::Unavailable`].
    #[instrument(skip(self))]
    pub async fn bootstrap(&self) -> Outcome {
        self.inner.bootstrap().await
    }

    /// Initializes the provider client with `application_id`.
    ///
    /// Does nothing unless the gate is [`SessionState::NeedsLoading`] once bootstrap is done.
    /// Concurrent callers share one attempt, and thus the first caller's `application_id`.
    /// After a failure the next call tries again.
    #[instrument(skip(self))]
    pub async fn initialize_client(&self, application_id: &str) -> Outcome {
        // the slot is claimed before bootstrap is awaited, so the first caller's id is used
        let attempt = self.inner.initialize.join_or_start(|| {
            let inner = Arc::clone(&self.inner);
            let bootstrap = self.inner.bootstrap();
            let application_id = application_id.to_string();
            async move {
                if let Err(e) = bootstrap.await {
                    return Err(e);
                }
                if *inner.state.borrow() != SessionState::NeedsLoading {
                    return Ok(());
                }
                match inner.provider.initialize_client(&application_id).await {
                    Ok(()) => {
                        inner.transition(SessionState::Loaded);
                        Ok(())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "identity provider client failed to initialize");
                        Err(SessionError::Initialization(shared(e)))
                    }
                }
            }
            .boxed()
        });

        let outcome = attempt.clone().await;
        if outcome.is_err() {
            self.inner.initialize.forget(&attempt);
        }
        outcome
    }

    fn require_client(&self) -> Outcome {
        let state = self.state();
        if state.is_client_ready() {
            Ok(())
        } else {
            Err(SessionError::Initialization(shared(eyre::eyre!(
                "identity provider client is not initialized (state: {state})"
            ))))
        }
    }

    /// Checks whether an earlier authorization is still usable, and if so, moves to
    /// [`SessionState::SignedIn`] without user interaction.
    #[instrument(skip(self), ret)]
    pub async fn detect_existing_session(&self) -> Result<bool, SessionError> {
        self.bootstrap().await?;
        self.require_client()?;
        if self.state() == SessionState::SignedIn {
            return Ok(true);
        }

        let signed_in = self
            .inner
            .provider
            .is_signed_in()
            .await
            .map_err(|e| SessionError::Authentication(shared(e)))?;
        if signed_in {
            self.inner.transition(SessionState::SignedIn);
        }
        Ok(signed_in)
    }

    /// Runs the whole loading sequence and returns where it ended up.
    pub async fn load(&self, application_id: &str) -> Result<SessionState, SessionError> {
        self.bootstrap().await?;
        self.initialize_client(application_id).await?;
        self.detect_existing_session().await?;
        Ok(self.state())
    }

    /// Makes sure someone is signed in, prompting the user only if nobody is.
    ///
    /// Concurrent callers share one sign-in attempt. Once it has finished, the next call
    /// starts afresh.
    #[instrument(skip(self))]
    pub async fn sign_in_if_needed(&self) -> Outcome {
        self.bootstrap().await?;
        if self.state() == SessionState::SignedIn {
            return Ok(());
        }
        self.require_client()?;

        let attempt = self.inner.sign_in.join_or_start(|| {
            let inner = Arc::clone(&self.inner);
            async move {
                let signed_in = match inner.provider.is_signed_in().await {
                    Ok(signed_in) => signed_in,
                    Err(e) => return Err(SessionError::Authentication(shared(e))),
                };
                if !signed_in {
                    tracing::info!("prompting user to sign in");
                    if let Err(e) = inner.provider.sign_in().await {
                        return Err(SessionError::Authentication(shared(e)));
                    }
                }
                inner.transition(SessionState::SignedIn);
                Ok(())
            }
            .boxed()
        });

        let outcome = attempt.clone().await;
        self.inner.sign_in.forget(&attempt);
        outcome
    }

    /// Ends the current session, if any, and forgets the profile.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> Outcome {
        self.bootstrap().await?;
        match self.state() {
            SessionState::SignedIn => {
                self.inner
                    .provider
                    .sign_out()
                    .await
                    .map_err(|e| SessionError::Authentication(shared(e)))?;
                self.inner.transition(SessionState::Loaded);
                self.inner.set_profile(Profile::default());
            }
            SessionState::Loaded => self.inner.set_profile(Profile::default()),
            SessionState::NeedsLoading | SessionState::Unavailable => {}
        }
        Ok(())
    }

    /// Signs in if needed, then fetches and stores the user's profile.
    ///
    /// Returns the signed-in user's email.
    #[instrument(skip(self))]
    pub async fn refresh_profile(&self) -> Result<String, SessionError> {
        self.sign_in_if_needed().await?;

        let profile = self
            .inner
            .provider
            .get_current_profile()
            .await
            .map_err(|e| SessionError::ProfileFetch(shared(e)))?;
        let email = profile.email.clone();
        self.inner.set_profile(profile);
        Ok(email)
    }

    /// The stored profile, fetched first when someone is signed in but it was never loaded.
    ///
    /// Unlike [`refresh_profile`](Self::refresh_profile) this never prompts anyone to sign in.
    #[instrument(skip(self))]
    pub async fn current_profile(&self) -> Result<Profile, SessionError> {
        if self.state() == SessionState::SignedIn && self.profile().email.is_empty() {
            self.refresh_profile().await?;
        }
        Ok(self.profile())
    }

    /// Makes the provider offer an account chooser on the next interactive sign-in.
    #[instrument(skip(self))]
    pub async fn force_account_selection(&self) -> Outcome {
        self.bootstrap().await?;
        self.inner
            .provider
            .prompt_account_selection()
            .await
            .map_err(|e| SessionError::Authentication(shared(e)))
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::{Capability, MockProvider};
    use pretty_assertions::assert_eq;
    use super::*;
    use tokio::sync::mpsc;

    fn gate() -> (SessionGate<MockProvider>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (SessionGate::with_sink(MockProvider::new(), tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn concurrent_bootstraps_load_once() {
        let (gate, _rx) = gate();
        let (a, b, c) = tokio::join!(gate.bootstrap(), gate.bootstrap(), gate.bootstrap());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert!(gate.bootstrap().await.is_ok());

        assert_eq!(gate.provider().calls(Capability::LoadLibrary), 1);
        assert_eq!(gate.state(), SessionState::NeedsLoading);
    }

    #[tokio::test]
    async fn failed_bootstrap_is_permanent() {
        let (gate, mut rx) = gate();
        gate.provider().fail(Capability::LoadLibrary, "script blocked");

        let (a, b) = tokio::join!(gate.bootstrap(), gate.bootstrap());
        for outcome in [a, b] {
            let err = outcome.unwrap_err();
            assert!(matches!(err, SessionError::ProviderUnavailable(_)));
            assert_eq!(
                std::error::Error::source(&err).unwrap().to_string(),
                "script blocked"
            );
        }

        // even once the library would load, the first outcome sticks
        gate.provider().succeed(Capability::LoadLibrary);
        assert!(matches!(
            gate.initialize_client("app").await,
            Err(SessionError::ProviderUnavailable(_))
        ));
        assert!(gate.sign_out().await.is_err());

        assert_eq!(gate.provider().calls(Capability::LoadLibrary), 1);
        assert_eq!(gate.provider().calls(Capability::InitializeClient), 0);
        assert_eq!(gate.state(), SessionState::Unavailable);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::StateChanged(SessionState::Unavailable)]
        );
    }

    #[tokio::test]
    async fn client_is_initialized_at_most_once() {
        let (gate, mut rx) = gate();
        let (a, b) = tokio::join!(
            gate.initialize_client("first"),
            gate.initialize_client("second")
        );
        a.unwrap();
        b.unwrap();
        gate.initialize_client("third").await.unwrap();

        assert_eq!(gate.provider().calls(Capability::InitializeClient), 1);
        assert_eq!(gate.provider().application_ids(), vec!["first"]);
        assert_eq!(gate.state(), SessionState::Loaded);
        assert_eq!(
            drain(&mut rx),
            vec![SessionEvent::StateChanged(SessionState::Loaded)]
        );
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let (gate, _rx) = gate();
        gate.provider().fail(Capability::InitializeClient, "bad client id");

        let err = gate.initialize_client("app").await.unwrap_err();
        assert!(matches!(err, SessionError::Initialization(_)));
        assert_eq!(gate.state(), SessionState::NeedsLoading);

        gate.provider().succeed(Capability::InitializeClient);
        gate.initialize_client("app").await.unwrap();
        assert_eq!(gate.state(), SessionState::Loaded);
        assert_eq!(gate.provider().calls(Capability::InitializeClient), 2);
    }

    #[tokio::test]
    async fn detection_requires_an_initialized_client() {
        let (gate, _rx) = gate();
        assert!(matches!(
            gate.detect_existing_session().await,
            Err(SessionError::Initialization(_))
        ));
        assert!(matches!(
            gate.sign_in_if_needed().await,
            Err(SessionError::Initialization(_))
        ));
        assert_eq!(gate.provider().calls(Capability::IsSignedIn), 0);
    }

    #[tokio::test]
    async fn load_detects_existing_session() {
        let (gate, mut rx) = gate();
        gate.provider().set_signed_in(true);

        assert_eq!(gate.load("app").await.unwrap(), SessionState::SignedIn);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::StateChanged(SessionState::Loaded),
                SessionEvent::StateChanged(SessionState::SignedIn),
            ]
        );

        // already signed in, so the provider is not asked again
        assert!(gate.detect_existing_session().await.unwrap());
        assert_eq!(gate.provider().calls(Capability::IsSignedIn), 1);
    }

    #[tokio::test]
    async fn load_without_session_stays_loaded() {
        let (gate, _rx) = gate();
        assert_eq!(gate.load("app").await.unwrap(), SessionState::Loaded);
        assert!(!gate.detect_existing_session().await.unwrap());
    }

    #[tokio::test]
    async fn sign_in_only_prompts_when_needed() {
        let (gate, _rx) = gate();
        gate.load("app").await.unwrap();

        gate.sign_in_if_needed().await.unwrap();
        assert_eq!(gate.state(), SessionState::SignedIn);
        assert_eq!(gate.provider().calls(Capability::SignIn), 1);

        gate.sign_in_if_needed().await.unwrap();
        assert_eq!(gate.provider().calls(Capability::SignIn), 1);
    }

    #[tokio::test]
    async fn concurrent_sign_ins_prompt_once() {
        let (gate, mut rx) = gate();
        gate.provider().set_profile("someone@example.com");
        gate.load("app").await.unwrap();
        drain(&mut rx);

        let (a, b) = tokio::join!(gate.refresh_profile(), gate.refresh_profile());
        assert_eq!(a.unwrap(), "someone@example.com");
        assert_eq!(b.unwrap(), "someone@example.com");
        assert_eq!(gate.provider().calls(Capability::SignIn), 1);
        assert_eq!(gate.provider().calls(Capability::IsSignedIn), 2);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::StateChanged(SessionState::SignedIn),
                SessionEvent::ProfileChanged("someone@example.com".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn finished_sign_in_is_not_reused() {
        let (gate, _rx) = gate();
        gate.load("app").await.unwrap();
        gate.provider().fail(Capability::SignIn, "popup closed");
        assert!(gate.sign_in_if_needed().await.is_err());

        gate.provider().succeed(Capability::SignIn);
        gate.sign_in_if_needed().await.unwrap();
        assert_eq!(gate.state(), SessionState::SignedIn);
        assert_eq!(gate.provider().calls(Capability::SignIn), 2);
    }

    #[tokio::test]
    async fn sign_in_is_skipped_for_usable_authorization() {
        let (gate, _rx) = gate();
        gate.initialize_client("app").await.unwrap();
        gate.provider().set_signed_in(true);

        gate.sign_in_if_needed().await.unwrap();
        assert_eq!(gate.state(), SessionState::SignedIn);
        assert_eq!(gate.provider().calls(Capability::SignIn), 0);
    }

    #[tokio::test]
    async fn failed_sign_in_keeps_state() {
        let (gate, _rx) = gate();
        gate.load("app").await.unwrap();
        gate.provider().fail(Capability::SignIn, "popup closed");

        assert!(matches!(
            gate.sign_in_if_needed().await,
            Err(SessionError::Authentication(_))
        ));
        assert_eq!(gate.state(), SessionState::Loaded);
    }

    #[tokio::test]
    async fn sign_out_when_not_signed_in() {
        let (gate, mut rx) = gate();
        gate.load("app").await.unwrap();
        drain(&mut rx);

        gate.sign_out().await.unwrap();
        assert_eq!(gate.state(), SessionState::Loaded);
        assert_eq!(gate.profile().email, "");
        assert_eq!(gate.provider().calls(Capability::SignOut), 0);
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test]
    async fn sign_out_before_loading_does_nothing() {
        let (gate, _rx) = gate();
        gate.sign_out().await.unwrap();
        assert_eq!(gate.state(), SessionState::NeedsLoading);
        assert_eq!(gate.provider().calls(Capability::SignOut), 0);
    }

    #[tokio::test]
    async fn sign_out_clears_profile() {
        let (gate, mut rx) = gate();
        gate.provider().set_profile("someone@example.com");
        gate.load("app").await.unwrap();
        assert_eq!(gate.refresh_profile().await.unwrap(), "someone@example.com");
        drain(&mut rx);

        let mut profile = gate.subscribe_profile();
        gate.sign_out().await.unwrap();

        assert_eq!(gate.state(), SessionState::Loaded);
        assert!(profile.has_changed().unwrap());
        assert!(profile.borrow_and_update().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::StateChanged(SessionState::Loaded),
                SessionEvent::ProfileChanged(String::new()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_sign_out_keeps_session() {
        let (gate, _rx) = gate();
        gate.provider().set_profile("someone@example.com");
        gate.load("app").await.unwrap();
        gate.refresh_profile().await.unwrap();
        gate.provider().fail(Capability::SignOut, "network down");

        assert!(matches!(
            gate.sign_out().await,
            Err(SessionError::Authentication(_))
        ));
        assert_eq!(gate.state(), SessionState::SignedIn);
        assert_eq!(gate.profile().email, "someone@example.com");
    }

    #[tokio::test]
    async fn failed_profile_refresh_keeps_stored_email() {
        let (gate, mut rx) = gate();
        gate.provider().set_profile("someone@example.com");
        gate.load("app").await.unwrap();
        gate.refresh_profile().await.unwrap();
        drain(&mut rx);

        gate.provider().fail(Capability::GetCurrentProfile, "userinfo returned 500");
        assert!(matches!(
            gate.refresh_profile().await,
            Err(SessionError::ProfileFetch(_))
        ));
        assert_eq!(gate.profile().email, "someone@example.com");
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test]
    async fn restored_session_profile_is_fetched_on_demand() {
        let (gate, _rx) = gate();
        gate.provider().set_signed_in(true);
        gate.provider().set_profile("someone@example.com");
        assert_eq!(gate.load("app").await.unwrap(), SessionState::SignedIn);
        assert_eq!(gate.profile().email, "");

        let profile = gate.current_profile().await.unwrap();
        assert_eq!(profile.email, "someone@example.com");
        gate.current_profile().await.unwrap();
        assert_eq!(gate.provider().calls(Capability::GetCurrentProfile), 1);
        assert_eq!(gate.provider().calls(Capability::SignIn), 0);
    }

    #[tokio::test]
    async fn profile_is_not_fetched_without_sign_in() {
        let (gate, _rx) = gate();
        gate.load("app").await.unwrap();
        assert_eq!(gate.current_profile().await.unwrap(), Profile::default());
        assert_eq!(gate.provider().calls(Capability::GetCurrentProfile), 0);
        assert_eq!(gate.provider().calls(Capability::SignIn), 0);
    }

    #[tokio::test]
    async fn profile_refresh_signs_in_first() {
        let (gate, mut rx) = gate();
        gate.provider().set_profile("someone@example.com");
        gate.load("app").await.unwrap();
        drain(&mut rx);

        assert_eq!(gate.refresh_profile().await.unwrap(), "someone@example.com");
        assert_eq!(gate.provider().calls(Capability::SignIn), 1);
        assert_eq!(
            drain(&mut rx),
            vec![
                SessionEvent::StateChanged(SessionState::SignedIn),
                SessionEvent::ProfileChanged("someone@example.com".to_string()),
            ]
        );

        // an unchanged profile is not announced again
        gate.refresh_profile().await.unwrap();
        assert_eq!(drain(&mut rx), vec![]);
    }

    #[tokio::test]
    async fn account_selection_keeps_state() {
        let (gate, _rx) = gate();
        gate.load("app").await.unwrap();
        gate.force_account_selection().await.unwrap();
        assert_eq!(gate.state(), SessionState::Loaded);
        assert_eq!(gate.provider().calls(Capability::PromptAccountSelection), 1);

        gate.provider().fail(Capability::PromptAccountSelection, "not supported");
        assert!(matches!(
            gate.force_account_selection().await,
            Err(SessionError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn state_is_observable() {
        let (gate, _rx) = gate();
        let mut state = gate.subscribe_state();
        gate.load("app").await.unwrap();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), SessionState::Loaded);
    }
}
