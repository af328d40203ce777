//! Session client facade
//!
//! Wires the credential store, session state, renewal coordinator and
//! request gateway together, and owns the operations that start or end a
//! session: startup restore, login, register, logout, and claims refresh.

use std::path::PathBuf;
use std::sync::Arc;

use common::ClientConfig;
use session_auth::{
    AuthApi, Claims, CredentialPair, CredentialStore, Error, LoginRequest, ME_PATH,
    MessageResponse, REVOKE_PATH, RegisterRequest, Result, RevokeTokenRequest, SessionSnapshot,
    SessionState, TokenResponse, UserRolesResponse, now_millis, validate_login,
    validate_registration,
};
use session_renewal::RenewalCoordinator;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::gateway::RequestGateway;
use crate::request::ApiRequest;

pub struct SessionClient {
    api: AuthApi,
    store: Arc<CredentialStore>,
    session: Arc<SessionState>,
    coordinator: RenewalCoordinator,
    gateway: RequestGateway,
}

impl SessionClient {
    /// Build the HTTP client from `config`, open the credential store, and
    /// restore any persisted session.
    pub async fn open(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;
        Self::with_http_client(http, &config.api.base_url, config.storage.path.clone()).await
    }

    /// Like `open`, with a caller-supplied HTTP client.
    pub async fn with_http_client(
        http: reqwest::Client,
        base_url: &str,
        store_path: PathBuf,
    ) -> Result<Self> {
        let store = Arc::new(CredentialStore::open(store_path).await?);
        let session = Arc::new(SessionState::new());
        let api = AuthApi::new(http.clone(), base_url);
        let coordinator = RenewalCoordinator::new(store.clone(), session.clone(), api.clone());
        let gateway = RequestGateway::new(http, api.base_url(), coordinator.clone());

        let client = Self {
            api,
            store,
            session,
            coordinator,
            gateway,
        };
        client.restore().await?;
        Ok(client)
    }

    /// Startup liveness check: the only place the local clock decides
    /// whether a session exists.
    async fn restore(&self) -> Result<()> {
        if !self.store.is_live().await {
            self.store.clear().await?;
            self.session.reset();
            info!("no live session at startup");
            return Ok(());
        }

        let Some(stored) = self.store.load().await else {
            return Ok(());
        };
        let epoch = self.session.adopt(&stored.pair, stored.claims.as_ref());
        info!(
            principal = stored.claims.as_ref().map(|c| c.principal_id.as_str()),
            "restored persisted session"
        );
        if stored.claims.is_none() {
            self.load_claims(epoch).await;
        }
        Ok(())
    }

    /// Sign in with email and password.
    ///
    /// Backend rejection is `InvalidCredentials` and leaves the session as it was.
    pub async fn login(&self, request: LoginRequest) -> Result<SessionSnapshot> {
        validate_login(&request)?;
        let tokens = self.api.login(&request).await?;
        self.begin_session(tokens).await?;
        info!(email = %request.email, "logged in");
        Ok(self.session.snapshot())
    }

    /// Create an account and sign in as it.
    pub async fn register(
        &self,
        request: RegisterRequest,
        confirm_password: &str,
    ) -> Result<SessionSnapshot> {
        validate_registration(&request, confirm_password)?;
        let tokens = self.api.register(&request).await?;
        self.begin_session(tokens).await?;
        info!(email = %request.email, "registered and logged in");
        Ok(self.session.snapshot())
    }

    async fn begin_session(&self, tokens: TokenResponse) -> Result<()> {
        let pair = CredentialPair::from_response(tokens, now_millis())?;
        self.store.save(pair.clone(), None).await?;
        let epoch = self.session.adopt(&pair, None);
        self.load_claims(epoch).await;
        Ok(())
    }

    /// Fetch claims for the session at `epoch`. Failure is logged, not fatal.
    async fn load_claims(&self, epoch: u64) {
        match self.fetch_claims().await {
            Ok(claims) => {
                if self.session.adopt_claims(epoch, &claims)
                    && let Err(e) = self.store.update_claims(claims).await
                {
                    warn!(error = %e, "failed to cache claims");
                }
            }
            Err(e) => warn!(error = %e, "claims request failed, session has no roles"),
        }
    }

    async fn fetch_claims(&self) -> Result<Claims> {
        let response: UserRolesResponse = self.gateway.json(&ApiRequest::get(ME_PATH)).await?;
        Ok(response.into())
    }

    /// Re-query the backend for the current principal's roles.
    pub async fn refresh_claims(&self) -> Result<Claims> {
        let epoch = self.session.snapshot().epoch;
        let claims = self.fetch_claims().await?;
        if self.session.adopt_claims(epoch, &claims) {
            self.store.update_claims(claims.clone()).await?;
        }
        Ok(claims)
    }

    /// End the session.
    ///
    /// The refresh credential is revoked server-side first, through the
    /// gateway like any protected call; local state is cleared once that call
    /// completes, whether or not it succeeded. Safe to call when already
    /// logged out. An in-flight renewal is not cancelled, its result is
    /// discarded.
    pub async fn logout(&self) -> Result<()> {
        if let Some(refresh) = self.store.refresh_token().await {
            match self.revoke(refresh.expose()).await {
                Ok(message) => debug!(response = %message, "refresh credential revoked"),
                Err(e) => warn!(error = %e, "revoke failed, clearing local session anyway"),
            }
        }

        let cleared = self.store.clear().await;
        self.session.reset();
        if let Err(e) = &cleared {
            error!(error = %e, "failed to clear credential store on logout");
        } else {
            info!("logged out");
        }
        cleared
    }

    async fn revoke(&self, refresh_token: &str) -> Result<String> {
        let request = ApiRequest::post(REVOKE_PATH).json(&RevokeTokenRequest { refresh_token })?;
        let response: MessageResponse = self.gateway.json(&request).await?;
        Ok(response.message)
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn session(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.session.has_role(role)
    }

    pub fn is_admin(&self) -> bool {
        self.session.is_admin()
    }
}
