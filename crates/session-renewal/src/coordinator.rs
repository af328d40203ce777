//! Renewal coordinator: one refresh exchange per burst of rejections
//!
//! The in-flight handle is a `Shared` future stored in a tokio Mutex slot. The
//! slot lock is the only lock: "join the existing exchange" versus "start a
//! new one" is decided while holding it, so two callers can never both see an
//! empty slot and start their own exchange, even on a multi-threaded runtime.
//!
//! The exchange itself runs in a spawned task. It applies the outcome to the
//! credential store and session, then clears the slot, and only then
//! completes. Waiters are released strictly after all of that, so a caller
//! that re-enters `renew()` right after being released starts a fresh
//! exchange instead of joining a resolved one. Dropping every waiter does not
//! cancel the exchange.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use session_auth::{
    AuthApi, CredentialPair, CredentialStore, Error, RefreshTokenRequest, Result, SessionState,
    now_millis,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

type RenewalHandle = Shared<BoxFuture<'static, Result<CredentialPair>>>;

struct InFlight {
    id: u64,
    handle: RenewalHandle,
}

struct Inner {
    store: Arc<CredentialStore>,
    session: Arc<SessionState>,
    api: AuthApi,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

/// Deduplicates concurrent renewal requests into a single exchange.
///
/// Cheap to clone; clones share the same in-flight slot.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

impl RenewalCoordinator {
    pub fn new(store: Arc<CredentialStore>, session: Arc<SessionState>, api: AuthApi) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                session,
                api,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.inner.store
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.session
    }

    /// Whether an exchange is currently in flight.
    pub async fn is_renewing(&self) -> bool {
        self.inner.in_flight.lock().await.is_some()
    }

    /// Obtain a fresh credential pair, joining an in-flight exchange if any.
    pub async fn renew(&self) -> Result<CredentialPair> {
        self.renew_rejected(None).await
    }

    /// Like `renew`, for a caller whose request carrying `rejected_access`
    /// came back unauthorized.
    ///
    /// If the store already holds a different access credential, another
    /// caller finished a renewal after this request was sent; the current
    /// pair is returned without a new exchange.
    pub async fn renew_rejected(&self, rejected_access: Option<&str>) -> Result<CredentialPair> {
        let mut slot = self.inner.in_flight.lock().await;

        if let Some(in_flight) = slot.as_ref() {
            let handle = in_flight.handle.clone();
            drop(slot);
            debug!("joining in-flight renewal");
            record_renewal("joined");
            return handle.await;
        }

        let Some(current) = self.inner.store.load().await else {
            drop(slot);
            warn!("renewal requested without a refresh credential, logging out");
            self.inner.session.reset();
            record_renewal("no_refresh");
            return Err(Error::NoRefreshCredential);
        };

        if let Some(rejected) = rejected_access
            && !current.pair.access_token.matches(&rejected.to_string())
        {
            debug!("access credential already renewed, skipping exchange");
            record_renewal("skipped");
            return Ok(current.pair);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(exchange(self.inner.clone(), id, current.pair.clone()));
        let inner = self.inner.clone();
        let stale = current.pair;
        let handle: RenewalHandle = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    // The task died before applying its outcome or freeing the slot.
                    error!(renewal_id = id, error = %e, "renewal task aborted, logging out");
                    log_out_after_failure(&inner, &stale).await;
                    release_slot(&inner, id).await;
                    record_renewal("failure");
                    Err(Error::RenewalFailed(format!("renewal task aborted: {e}")))
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            handle: handle.clone(),
        });
        drop(slot);

        handle.await
    }
}

/// Run one refresh exchange and apply its outcome before releasing waiters.
async fn exchange(inner: Arc<Inner>, id: u64, stale: CredentialPair) -> Result<CredentialPair> {
    info!(renewal_id = id, "starting credential renewal");

    let response = inner
        .api
        .refresh(&RefreshTokenRequest {
            access_token: stale.access_token.expose(),
            refresh_token: stale.refresh_token.expose(),
        })
        .await;

    let renewed = response.and_then(|tokens| CredentialPair::from_response(tokens, now_millis()));
    let outcome = match renewed {
        Ok(renewed) => adopt_renewed(&inner, id, &stale, renewed).await,
        Err(e) => {
            warn!(renewal_id = id, error = %e, "credential renewal failed, logging out");
            log_out_after_failure(&inner, &stale).await;
            record_renewal("failure");
            Err(Error::RenewalFailed(e.to_string()))
        }
    };

    release_slot(&inner, id).await;
    outcome
}

/// Empty the in-flight slot if it still holds exchange `id`.
async fn release_slot(inner: &Inner, id: u64) {
    let mut slot = inner.in_flight.lock().await;
    if slot.as_ref().is_some_and(|f| f.id == id) {
        *slot = None;
    }
}

async fn adopt_renewed(
    inner: &Arc<Inner>,
    id: u64,
    stale: &CredentialPair,
    renewed: CredentialPair,
) -> Result<CredentialPair> {
    match inner
        .store
        .replace_if_current(stale.refresh_token.expose(), renewed)
        .await
    {
        Ok(Some(stored)) => {
            let epoch = inner
                .session
                .adopt_renewal(&stored.pair, stored.claims.as_ref());
            if stored.claims.is_none() {
                spawn_claims_backfill(inner.clone(), epoch, stored.pair.clone());
            }
            info!(renewal_id = id, expires_at = stored.pair.expires_at, "credential renewal succeeded");
            record_renewal("success");
            Ok(stored.pair)
        }
        Ok(None) => {
            info!(renewal_id = id, "session ended during renewal, discarding renewed credential");
            record_renewal("discarded");
            Err(Error::RenewalFailed(
                "session ended while renewal was in flight".into(),
            ))
        }
        Err(e) => {
            error!(renewal_id = id, error = %e, "failed to persist renewed credential");
            log_out_after_failure(inner, stale).await;
            record_renewal("failure");
            Err(Error::RenewalFailed(format!(
                "renewed credential could not be persisted: {e}"
            )))
        }
    }
}

/// Clear the store and reset the session, unless a different login replaced
/// the stale pair while the exchange was in flight.
async fn log_out_after_failure(inner: &Inner, stale: &CredentialPair) {
    match inner
        .store
        .clear_if_current(stale.refresh_token.expose())
        .await
    {
        Ok(true) => inner.session.reset(),
        Ok(false) => debug!("a newer login replaced the stale credential, keeping it"),
        Err(e) => {
            error!(error = %e, "failed to clear credential store after renewal failure");
            inner.session.reset();
        }
    }
}

/// Populate claims for a renewed session that has none cached.
///
/// Failure is non-fatal: the session stays authenticated without roles.
fn spawn_claims_backfill(inner: Arc<Inner>, epoch: u64, pair: CredentialPair) {
    tokio::spawn(async move {
        match inner.api.me(pair.access_token.expose()).await {
            Ok(claims) => {
                if inner.session.adopt_claims(epoch, &claims)
                    && let Err(e) = inner.store.update_claims(claims).await
                {
                    warn!(error = %e, "failed to cache claims after renewal");
                }
            }
            Err(e) => warn!(error = %e, "claims refresh after renewal failed"),
        }
    });
}

fn record_renewal(outcome: &'static str) {
    metrics::counter!("session_renewals_total", "outcome" => outcome).increment(1);
}
