//! The authentication session: single owner of all mutable auth state.
//!
//! State is only mutated through this type. Listener tasks report back over an event
//! channel; a pump task applies those events in order under the state lock. Each
//! device flow bumps a generation counter and events from older generations are
//! dropped, so a late token for a superseded flow is never accepted.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;

use crate::auth::credential::{redact, AuthenticationRequest, Credential, PendingAuthRequest};
use crate::auth::store::TokenStore;
use crate::auth::subscription::{AuthEvent, AuthEventKind, SubscriptionRequest, TokenSubscriber};
use crate::auth::{device_flow, refresh};
use crate::error::BridgeError;
use crate::graphql::GraphqlClient;

/// Result of [`AuthSession::ensure_valid_token`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Current token is valid for at least the refresh margin.
    Ready,
    /// Token was refreshed and persisted.
    Refreshed,
    /// No usable token is held.
    Unauthenticated,
}

/// Result of [`AuthSession::check_authentication_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthCheck {
    NoPendingRequest,
    Ready,
    Waiting {
        verification_url: String,
        /// False once the listener has ended without a token.
        listening: bool,
    },
    Expired,
}

#[derive(Debug, Default)]
struct AuthState {
    access_token: Option<String>,
    /// Credential behind `access_token`; `None` for a configured static token.
    active: Option<Credential>,
    /// Token delivered by the current device flow, until the next flow starts.
    received: Option<Credential>,
    pending: Option<PendingAuthRequest>,
    generation: u64,
    listener: Option<AbortHandle>,
}

struct SessionInner {
    state: Mutex<AuthState>,
    store: TokenStore,
    graphql: GraphqlClient,
}

#[derive(Clone)]
pub struct AuthSession {
    inner: Arc<SessionInner>,
    events: mpsc::UnboundedSender<AuthEvent>,
    subscriber: Arc<dyn TokenSubscriber>,
}

impl AuthSession {
    /// Create the session and spawn its event pump. Must be called inside a Tokio runtime.
    ///
    /// `static_token` is a personal access token from configuration; it has no expiry
    /// and is never refreshed.
    pub fn new(
        graphql: GraphqlClient,
        store: TokenStore,
        static_token: Option<String>,
        subscriber: Arc<dyn TokenSubscriber>,
    ) -> Self {
        let inner = Arc::new(SessionInner {
            state: Mutex::new(AuthState {
                access_token: static_token,
                ..AuthState::default()
            }),
            store,
            graphql,
        });

        let (events, mut rx) = mpsc::unbounded_channel::<AuthEvent>();
        let owner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                owner.apply(event).await;
            }
        });

        Self {
            inner,
            events,
            subscriber,
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.lock().await.access_token.clone()
    }

    pub async fn has_access_token(&self) -> bool {
        self.inner.state.lock().await.access_token.is_some()
    }

    pub async fn pending_request(&self) -> Option<PendingAuthRequest> {
        self.inner.state.lock().await.pending.clone()
    }

    pub async fn received_token(&self) -> Option<Credential> {
        self.inner.state.lock().await.received.clone()
    }

    /// Adopt the persisted credential at process start, refreshing it once if it is
    /// about to expire. Failures leave the session unauthenticated.
    pub async fn restore_from_disk(&self) {
        if self.has_access_token().await {
            tracing::info!("Using configured access token");
            return;
        }
        let Some(saved) = self.inner.load_stored().await else {
            return;
        };

        match saved.refresh_token.clone() {
            None if saved.needs_refresh(Utc::now()) => {
                tracing::warn!("Saved token is expired and cannot be refreshed");
            }
            Some(refresh_token) if saved.needs_refresh(Utc::now()) => {
                tracing::info!("Saved token is expired, attempting refresh...");
                match refresh::refresh_access_token(&self.inner.graphql, &refresh_token).await {
                    Ok(token) => {
                        let credential = Credential::issued(token, self.inner.store.endpoint());
                        self.adopt(credential.clone()).await;
                        self.inner.persist(credential).await;
                        tracing::info!("Token refreshed on startup");
                    }
                    Err(err) => tracing::error!("Token refresh on startup failed: {err}"),
                }
            }
            _ => {
                tracing::info!(token = %redact(&saved.access_token), "Using saved token from disk");
                self.adopt(saved).await;
            }
        }
    }

    /// Start a device flow. Any earlier flow is discarded and its listener torn down.
    pub async fn start_flow(&self) -> Result<AuthenticationRequest, BridgeError> {
        let request = device_flow::start_authentication_flow(&self.inner.graphql).await?;

        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        if let Some(previous) = state.listener.take() {
            tracing::debug!("Tearing down listener of superseded authentication flow");
            previous.abort();
        }
        state.pending = Some(PendingAuthRequest::from(&request));
        state.received = None;

        // Armed before the lock is released: events queue until the pump can apply them.
        let listener = self.subscriber.subscribe(
            SubscriptionRequest {
                request_id: request.id.clone(),
                generation: state.generation,
                bearer: state.access_token.clone(),
            },
            self.events.clone(),
        );
        state.listener = Some(listener);

        tracing::info!(
            request_id = %request.id,
            generation = state.generation,
            "Authentication flow pending"
        );
        Ok(request)
    }

    /// Non-blocking peek used by `check_authentication` polling.
    pub async fn check_authentication_state(&self) -> AuthCheck {
        let mut state = self.inner.state.lock().await;
        if state.received.is_some() {
            tracing::info!("Token already received from background subscription");
            return AuthCheck::Ready;
        }
        let Some(pending) = state.pending.clone() else {
            return AuthCheck::NoPendingRequest;
        };
        if pending.is_expired(Utc::now()) {
            tracing::warn!(request_id = %pending.request_id, "Authentication request expired");
            state.pending = None;
            if let Some(listener) = state.listener.take() {
                listener.abort();
            }
            return AuthCheck::Expired;
        }
        AuthCheck::Waiting {
            verification_url: pending.verification_url,
            listening: state.listener.is_some(),
        }
    }

    /// Make sure the held token is usable, refreshing it when it is within the margin.
    ///
    /// A token that is due and cannot be refreshed is dropped.
    pub async fn ensure_valid_token(&self) -> TokenStatus {
        let (stale_token, refresh_token) = {
            let state = self.inner.state.lock().await;
            match (&state.access_token, &state.active) {
                (Some(_), None) => return TokenStatus::Ready,
                (Some(_), Some(active)) if !active.needs_refresh(Utc::now()) => {
                    return TokenStatus::Ready
                }
                _ => {}
            }
            (
                state.access_token.clone(),
                state.active.as_ref().and_then(|c| c.refresh_token.clone()),
            )
        };

        let refresh_token = match refresh_token {
            Some(token) => Some(token),
            None => self.inner.load_stored().await.and_then(|c| c.refresh_token),
        };
        let Some(refresh_token) = refresh_token else {
            if stale_token.is_some() {
                tracing::warn!("Access token expired and no refresh token is available");
                self.drop_token(&stale_token).await;
            }
            return TokenStatus::Unauthenticated;
        };

        match refresh::refresh_access_token(&self.inner.graphql, &refresh_token).await {
            Ok(token) => {
                let credential = Credential::issued(token, self.inner.store.endpoint());
                self.adopt(credential.clone()).await;
                self.inner.persist(credential).await;
                tracing::info!("Token refreshed and saved");
                TokenStatus::Refreshed
            }
            Err(err) => {
                tracing::error!("Token refresh failed: {err}");
                self.drop_token(&stale_token).await;
                TokenStatus::Unauthenticated
            }
        }
    }

    /// Clear the held token unless a newer one replaced it meanwhile.
    async fn drop_token(&self, stale_token: &Option<String>) {
        let mut state = self.inner.state.lock().await;
        if state.access_token == *stale_token {
            state.access_token = None;
            state.active = None;
            state.received = None;
        }
    }

    /// Apply a listener event. The pump calls this for every channel event.
    pub async fn apply_event(&self, event: AuthEvent) {
        self.inner.apply(event).await;
    }

    async fn adopt(&self, credential: Credential) {
        let mut state = self.inner.state.lock().await;
        state.access_token = Some(credential.access_token.clone());
        state.active = Some(credential.clone());
        state.received = Some(credential);
    }
}

impl SessionInner {
    async fn apply(&self, event: AuthEvent) {
        let credential = {
            let mut state = self.state.lock().await;
            let current = event.generation == state.generation
                && state
                    .pending
                    .as_ref()
                    .is_some_and(|p| p.request_id == event.request_id);
            if !current {
                tracing::warn!(
                    request_id = %event.request_id,
                    generation = event.generation,
                    current_generation = state.generation,
                    "Ignoring event from superseded authentication flow"
                );
                return;
            }

            match event.kind {
                AuthEventKind::Subscribed => {
                    tracing::info!(request_id = %event.request_id, "Subscribed to authentication token");
                    return;
                }
                AuthEventKind::Failed(reason) => {
                    tracing::warn!(request_id = %event.request_id, "Listener failed: {reason}");
                    state.listener = None;
                    return;
                }
                AuthEventKind::Completed => {
                    tracing::info!(request_id = %event.request_id, "Listener completed without token");
                    state.listener = None;
                    return;
                }
                AuthEventKind::TokenReceived(token) => {
                    let credential = Credential::issued(token, self.store.endpoint());
                    state.access_token = Some(credential.access_token.clone());
                    state.active = Some(credential.clone());
                    state.received = Some(credential.clone());
                    state.pending = None;
                    state.listener = None;
                    credential
                }
            }
        };
        self.persist(credential).await;
    }

    /// Token file I/O runs on the blocking pool.
    async fn persist(&self, credential: Credential) {
        let store = self.store.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || store.save(&credential)).await {
            tracing::error!("Token save task failed: {err}");
        }
    }

    async fn load_stored(&self) -> Option<Credential> {
        let store = self.store.clone();
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(credential) => credential,
            Err(err) => {
                tracing::error!("Token load task failed: {err}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::AuthToken;
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingSubscriber {
        requests: StdMutex<Vec<SubscriptionRequest>>,
    }

    impl TokenSubscriber for RecordingSubscriber {
        fn subscribe(
            &self,
            request: SubscriptionRequest,
            _events: mpsc::UnboundedSender<AuthEvent>,
        ) -> AbortHandle {
            self.requests.lock().unwrap().push(request);
            tokio::spawn(std::future::pending::<()>()).abort_handle()
        }
    }

    struct Harness {
        server: MockServer,
        session: AuthSession,
        subscriber: Arc<RecordingSubscriber>,
        _dir: tempfile::TempDir,
    }

    async fn harness(static_token: Option<&str>) -> Harness {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"), server.uri());
        let graphql = GraphqlClient::new(reqwest::Client::new(), format!("{}/graphql", server.uri()));
        let subscriber = Arc::new(RecordingSubscriber::default());
        let session = AuthSession::new(
            graphql,
            store,
            static_token.map(str::to_string),
            subscriber.clone(),
        );
        Harness {
            server,
            session,
            subscriber,
            _dir: dir,
        }
    }

    async fn mount_flow(server: &MockServer, request_id: &str) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "operationName": "StartAuthenticationFlow" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "startAuthenticationFlow": { "request": {
                    "id": request_id,
                    "expiresAt": (Utc::now() + Duration::minutes(10)).to_rfc3339(),
                    "userCode": "CODE",
                    "verificationUrl": format!("https://verify.example/{request_id}")
                }}}
            })))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    async fn mount_refresh(server: &MockServer, response: ResponseTemplate, calls: u64) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "refreshToken": "r1" } })))
            .respond_with(response)
            .expect(calls)
            .mount(server)
            .await;
    }

    fn token(access: &str, expires_in: Option<Duration>) -> AuthToken {
        AuthToken {
            access_token: access.into(),
            refresh_token: Some("r1".into()),
            expires_at: expires_in.map(|d| Utc::now() + d),
        }
    }

    fn token_event(generation: u64, request_id: &str, access: &str) -> AuthEvent {
        AuthEvent {
            generation,
            request_id: request_id.into(),
            kind: AuthEventKind::TokenReceived(token(access, Some(Duration::hours(1)))),
        }
    }

    #[tokio::test]
    async fn no_pending_request_before_authenticate() {
        let h = harness(None).await;
        assert_eq!(
            h.session.check_authentication_state().await,
            AuthCheck::NoPendingRequest
        );
    }

    #[tokio::test]
    async fn token_event_completes_flow_and_persists() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;

        let request = h.session.start_flow().await.unwrap();
        assert_eq!(request.id, "req-1");
        assert!(matches!(
            h.session.check_authentication_state().await,
            AuthCheck::Waiting { listening: true, .. }
        ));

        let armed = h.subscriber.requests.lock().unwrap()[0].clone();
        assert_eq!(armed.request_id, "req-1");
        h.session
            .apply_event(token_event(armed.generation, "req-1", "a1"))
            .await;

        assert_eq!(h.session.check_authentication_state().await, AuthCheck::Ready);
        assert_eq!(h.session.access_token().await.as_deref(), Some("a1"));
        assert!(h.session.pending_request().await.is_none());
        assert_eq!(h.session.store().load().unwrap().access_token, "a1");
    }

    #[tokio::test]
    async fn late_token_from_superseded_flow_is_rejected() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;
        mount_flow(&h.server, "req-2").await;

        h.session.start_flow().await.unwrap();
        let second = h.session.start_flow().await.unwrap();
        assert_eq!(second.id, "req-2");

        let armed = h.subscriber.requests.lock().unwrap().clone();
        assert_eq!(armed.len(), 2);
        assert!(armed[1].generation > armed[0].generation);

        h.session
            .apply_event(token_event(armed[0].generation, "req-1", "stale"))
            .await;
        assert!(h.session.access_token().await.is_none());
        assert!(matches!(
            h.session.check_authentication_state().await,
            AuthCheck::Waiting { .. }
        ));

        h.session
            .apply_event(token_event(armed[1].generation, "req-2", "fresh"))
            .await;
        assert_eq!(h.session.access_token().await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn new_flow_discards_received_token() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;
        mount_flow(&h.server, "req-2").await;

        h.session.start_flow().await.unwrap();
        let armed = h.subscriber.requests.lock().unwrap()[0].clone();
        h.session
            .apply_event(token_event(armed.generation, "req-1", "a1"))
            .await;
        assert_eq!(h.session.check_authentication_state().await, AuthCheck::Ready);

        h.session.start_flow().await.unwrap();
        assert!(h.session.received_token().await.is_none());
        assert_eq!(
            h.session.pending_request().await.unwrap().request_id,
            "req-2"
        );
    }

    #[tokio::test]
    async fn listener_failure_keeps_request_pending() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;
        h.session.start_flow().await.unwrap();
        let armed = h.subscriber.requests.lock().unwrap()[0].clone();

        h.session
            .apply_event(armed.event(AuthEventKind::Failed("socket closed".into())))
            .await;
        match h.session.check_authentication_state().await {
            AuthCheck::Waiting {
                verification_url,
                listening,
            } => {
                assert_eq!(verification_url, "https://verify.example/req-1");
                assert!(!listening);
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn listener_completion_keeps_request_pending() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;
        h.session.start_flow().await.unwrap();
        let armed = h.subscriber.requests.lock().unwrap()[0].clone();

        h.session.apply_event(armed.event(AuthEventKind::Completed)).await;

        assert_eq!(
            h.session.check_authentication_state().await,
            AuthCheck::Waiting {
                verification_url: "https://verify.example/req-1".into(),
                listening: false,
            }
        );
        assert_eq!(h.session.pending_request().await.unwrap().request_id, "req-1");
        assert!(!h.session.has_access_token().await);
    }

    #[tokio::test]
    async fn expired_pending_request_is_cleared() {
        let h = harness(None).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "startAuthenticationFlow": { "request": {
                    "id": "req-old",
                    "expiresAt": (Utc::now() - Duration::minutes(1)).to_rfc3339(),
                    "verificationUrl": "https://verify.example/old"
                }}}
            })))
            .mount(&h.server)
            .await;

        h.session.start_flow().await.unwrap();
        assert_eq!(h.session.check_authentication_state().await, AuthCheck::Expired);
        assert_eq!(
            h.session.check_authentication_state().await,
            AuthCheck::NoPendingRequest
        );
    }

    #[tokio::test]
    async fn fresh_token_needs_no_remote_call() {
        let h = harness(None).await;
        mount_refresh(&h.server, ResponseTemplate::new(500), 0).await;
        h.session
            .adopt(Credential::issued(
                token("a1", Some(Duration::minutes(30))),
                &h.server.uri(),
            ))
            .await;

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Ready);
        assert_eq!(h.session.access_token().await.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn static_token_never_refreshes() {
        let h = harness(Some("pat")).await;
        mount_refresh(&h.server, ResponseTemplate::new(500), 0).await;
        h.session.store().save(&Credential::issued(
            token("old", Some(-Duration::hours(1))),
            &h.server.uri(),
        ));

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Ready);
        assert_eq!(h.session.access_token().await.as_deref(), Some("pat"));
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_after_new_flow() {
        let h = harness(None).await;
        mount_flow(&h.server, "req-1").await;
        mount_refresh(
            &h.server,
            ResponseTemplate::new(200).set_body_json(json!({
                "data": { "refreshAuthenticationToken": { "token": { "accessToken": "a2" } } }
            })),
            1,
        )
        .await;
        h.session
            .adopt(Credential::issued(
                token("a1", Some(-Duration::minutes(1))),
                &h.server.uri(),
            ))
            .await;

        h.session.start_flow().await.unwrap();
        assert!(h.session.received_token().await.is_none());

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Refreshed);
        assert_eq!(h.session.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_dropped() {
        let h = harness(None).await;
        h.session
            .adopt(Credential::issued(
                AuthToken {
                    access_token: "a1".into(),
                    refresh_token: None,
                    expires_at: Some(Utc::now() - Duration::hours(1)),
                },
                &h.server.uri(),
            ))
            .await;

        assert_eq!(
            h.session.ensure_valid_token().await,
            TokenStatus::Unauthenticated
        );
        assert!(!h.session.has_access_token().await);
        assert!(h.session.received_token().await.is_none());
    }

    #[tokio::test]
    async fn restore_skips_expired_token_without_refresh_token() {
        let h = harness(None).await;
        h.session.store().save(&Credential::issued(
            AuthToken {
                access_token: "saved".into(),
                refresh_token: None,
                expires_at: Some(Utc::now() - Duration::hours(1)),
            },
            &h.server.uri(),
        ));

        h.session.restore_from_disk().await;
        assert!(!h.session.has_access_token().await);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_once() {
        let h = harness(None).await;
        mount_refresh(
            &h.server,
            ResponseTemplate::new(200).set_body_json(json!({
                "data": { "refreshAuthenticationToken": { "token": {
                    "accessToken": "a2",
                    "refreshToken": "r2",
                    "expiresAt": (Utc::now() + Duration::hours(1)).to_rfc3339()
                }}}
            })),
            1,
        )
        .await;
        h.session
            .adopt(Credential::issued(
                token("a1", Some(Duration::minutes(2))),
                &h.server.uri(),
            ))
            .await;

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Refreshed);
        assert_eq!(h.session.access_token().await.as_deref(), Some("a2"));
        let saved = h.session.store().load().unwrap();
        assert_eq!(saved.access_token, "a2");
        assert_eq!(saved.refresh_token.as_deref(), Some("r2"));

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Ready);
    }

    #[tokio::test]
    async fn failed_refresh_clears_access_token() {
        let h = harness(None).await;
        mount_refresh(
            &h.server,
            ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{ "message": "refresh token revoked" }]
            })),
            1,
        )
        .await;
        h.session
            .adopt(Credential::issued(
                token("a1", Some(-Duration::minutes(1))),
                &h.server.uri(),
            ))
            .await;

        assert_eq!(
            h.session.ensure_valid_token().await,
            TokenStatus::Unauthenticated
        );
        assert!(!h.session.has_access_token().await);
        assert!(h.session.received_token().await.is_none());
    }

    #[tokio::test]
    async fn refresh_falls_back_to_stored_refresh_token() {
        let h = harness(None).await;
        mount_refresh(
            &h.server,
            ResponseTemplate::new(200).set_body_json(json!({
                "data": { "refreshAuthenticationToken": { "token": { "accessToken": "a2" } } }
            })),
            1,
        )
        .await;
        h.session.store().save(&Credential::issued(
            token("old", Some(-Duration::hours(1))),
            &h.server.uri(),
        ));

        assert_eq!(h.session.ensure_valid_token().await, TokenStatus::Refreshed);
        assert_eq!(h.session.access_token().await.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn restore_adopts_valid_saved_token() {
        let h = harness(None).await;
        h.session.store().save(&Credential::issued(
            token("saved", Some(Duration::hours(1))),
            &h.server.uri(),
        ));

        h.session.restore_from_disk().await;
        assert_eq!(h.session.access_token().await.as_deref(), Some("saved"));
        assert_eq!(h.session.check_authentication_state().await, AuthCheck::Ready);
    }

    #[tokio::test]
    async fn restore_survives_failed_refresh() {
        let h = harness(None).await;
        mount_refresh(&h.server, ResponseTemplate::new(502), 1).await;
        h.session.store().save(&Credential::issued(
            token("saved", Some(-Duration::hours(1))),
            &h.server.uri(),
        ));

        h.session.restore_from_disk().await;
        assert!(!h.session.has_access_token().await);
    }
}
