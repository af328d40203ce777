//! Observable in-memory session state
//!
//! A read-only projection over the credential store: whether the caller is
//! authenticated and which roles it holds. The whole snapshot is replaced in
//! one `watch` send, so observers never see `authenticated = true` paired
//! with roles from a different login.
//!
//! Transitions:
//! - LoggedOut → Authenticated (`adopt`, login/register)
//! - Authenticated → Authenticated (`adopt_renewal`, `adopt_claims`)
//! - Authenticated → LoggedOut (`reset`, logout / renewal failure / expired at startup)

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::debug;

use crate::constants::ADMIN_ROLE;
use crate::credentials::{Claims, CredentialPair};

/// Consistent view of the session at one instant.
///
/// `epoch` changes whenever a new login is adopted or the session is reset.
/// Claims fetched for one epoch are refused once the epoch has moved on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub authenticated: bool,
    pub principal: Option<String>,
    pub roles: BTreeSet<String>,
    /// Absolute expiry of the adopted access credential (unix millis).
    /// Informational only; liveness is decided by the backend.
    pub expires_at: Option<u64>,
    pub epoch: u64,
}

impl SessionSnapshot {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

/// Shared session flag, updated only through `adopt`, `adopt_renewal`,
/// `adopt_claims` and `reset`.
pub struct SessionState {
    tx: watch::Sender<SessionSnapshot>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Start unauthenticated.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().authenticated
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.tx.borrow().has_role(role)
    }

    pub fn is_admin(&self) -> bool {
        self.tx.borrow().is_admin()
    }

    /// Adopt a freshly issued login. Starts a new epoch and returns it.
    ///
    /// Roles are taken from `claims` only; without claims the session is
    /// authenticated with no roles until `adopt_claims` supplies them.
    pub fn adopt(&self, pair: &CredentialPair, claims: Option<&Claims>) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|s| {
            epoch = s.epoch + 1;
            *s = authenticated_snapshot(pair, claims, epoch);
        });
        debug!(epoch, "session adopted");
        epoch
    }

    /// Adopt a renewed pair for the login already in place.
    ///
    /// Keeps the current epoch (the principal has not changed) and replaces
    /// roles only when `claims` is given. If the session was reset meanwhile,
    /// this behaves like `adopt`.
    pub fn adopt_renewal(&self, pair: &CredentialPair, claims: Option<&Claims>) -> u64 {
        let mut epoch = 0;
        self.tx.send_modify(|s| {
            if s.authenticated {
                epoch = s.epoch;
                s.expires_at = Some(pair.expires_at);
                if let Some(claims) = claims {
                    s.principal = Some(claims.principal_id.clone());
                    s.roles = claims.roles.clone();
                }
            } else {
                epoch = s.epoch + 1;
                *s = authenticated_snapshot(pair, claims, epoch);
            }
        });
        debug!(epoch, "session renewed");
        epoch
    }

    /// Attach claims to the session started at `epoch`.
    ///
    /// Returns false (and changes nothing) when the session was reset or a
    /// different login was adopted since.
    pub fn adopt_claims(&self, epoch: u64, claims: &Claims) -> bool {
        let applied = self.tx.send_if_modified(|s| {
            if !s.authenticated || s.epoch != epoch {
                return false;
            }
            s.principal = Some(claims.principal_id.clone());
            s.roles = claims.roles.clone();
            true
        });
        if !applied {
            debug!(epoch, "ignoring claims for a superseded session");
        }
        applied
    }

    /// Drop to logged out. Idempotent: resetting an unauthenticated session
    /// notifies nobody.
    pub fn reset(&self) {
        let changed = self.tx.send_if_modified(|s| {
            if !s.authenticated && s.roles.is_empty() && s.principal.is_none() {
                return false;
            }
            *s = SessionSnapshot {
                epoch: s.epoch + 1,
                ..SessionSnapshot::default()
            };
            true
        });
        if changed {
            debug!("session reset");
        }
    }
}

fn authenticated_snapshot(pair: &CredentialPair, claims: Option<&Claims>, epoch: u64) -> SessionSnapshot {
    SessionSnapshot {
        authenticated: true,
        principal: claims.map(|c| c.principal_id.clone()),
        roles: claims.map(|c| c.roles.clone()).unwrap_or_default(),
        expires_at: Some(pair.expires_at),
        epoch,
    }
}
