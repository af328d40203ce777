//! Durable storage for the session's credential pair and cached claims
//!
//! The store is a JSON file with four keys (`accessToken`, `refreshToken`,
//! `tokenExpiry`, `claims`). The pair is written and cleared as a unit; an
//! empty object means "logged out". All writes use atomic temp-file + rename,
//! and a tokio Mutex serializes writers (login, renewal, logout).
//!
//! In-memory state is only replaced after the file write succeeds, so a
//! failed write never leaves memory and disk disagreeing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::TokenResponse;
use crate::constants::ADMIN_ROLE;
use crate::error::{Error, Result};

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Access + refresh credential with absolute expiry.
///
/// `expires_at` is a unix timestamp in milliseconds, computed from the
/// backend's `expiresIn` (seconds delta) at the moment the response arrived.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>, expires_at: u64) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
            expires_at,
        }
    }

    /// Build a pair from a token response received at `now` (unix millis).
    ///
    /// An `expiresIn` whose absolute expiry does not fit in a u64 is rejected.
    pub fn from_response(response: TokenResponse, now: u64) -> Result<Self> {
        let expires_at = response
            .expires_in
            .checked_mul(1000)
            .and_then(|delta| now.checked_add(delta))
            .ok_or_else(|| {
                Error::CredentialParse(format!(
                    "expiresIn {} is out of range",
                    response.expires_in
                ))
            })?;
        Ok(Self::new(
            response.access_token,
            response.refresh_token,
            expires_at,
        ))
    }

    pub fn is_live_at(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// Authorization metadata for the current principal.
///
/// Cached next to the pair but never authoritative: it can always be
/// re-derived from the backend's `/me` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "email")]
    pub principal_id: String,
    pub roles: BTreeSet<String>,
}

impl Claims {
    pub fn new<I, S>(principal_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal_id: principal_id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

/// Everything the store holds for a logged-in session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub pair: CredentialPair,
    pub claims: Option<Claims>,
}

/// On-disk layout, keyed by the `*_KEY` constants. All fields absent means
/// cleared.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredRecord {
    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    /// Epoch milliseconds as a decimal string
    #[serde(rename = "tokenExpiry", default, skip_serializing_if = "Option::is_none")]
    token_expiry: Option<String>,
    /// JSON-encoded `Claims`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claims: Option<String>,
}

impl StoredRecord {
    fn from_session(session: Option<&StoredSession>) -> Result<Self> {
        let Some(session) = session else {
            return Ok(Self::default());
        };
        let claims = session
            .claims
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::CredentialParse(format!("serializing claims: {e}")))?;
        Ok(Self {
            access_token: Some(session.pair.access_token.expose().clone()),
            refresh_token: Some(session.pair.refresh_token.expose().clone()),
            token_expiry: Some(session.pair.expires_at.to_string()),
            claims,
        })
    }

    /// Convert to a session. Partial pairs are rejected (`Err`) so the caller
    /// can reset the file; unreadable claims are dropped since they are
    /// re-derivable.
    fn into_session(self) -> std::result::Result<Option<StoredSession>, &'static str> {
        let (access, refresh, expiry) = match (self.access_token, self.refresh_token, self.token_expiry) {
            (None, None, None) => return Ok(None),
            (Some(a), Some(r), Some(e)) => (a, r, e),
            _ => return Err("credential pair is incomplete"),
        };
        let expires_at = expiry
            .trim()
            .parse::<u64>()
            .map_err(|_| "token expiry is not an epoch millisecond value")?;

        let claims = self.claims.and_then(|raw| match serde_json::from_str::<Claims>(&raw) {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(error = %e, "discarding unreadable cached claims");
                None
            }
        });

        Ok(Some(StoredSession {
            pair: CredentialPair::new(access, refresh, expires_at),
            claims,
        }))
    }
}

/// File-backed credential store shared by every request path.
///
/// Reads lock briefly and clone, so request-time reads never wait on disk I/O
/// longer than a concurrent write takes.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<Option<StoredSession>>,
}

impl CredentialStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created as `{}` (never logged in). A file holding an
    /// incomplete pair violates the write-as-a-unit invariant and is reset.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let record: StoredRecord = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            match record.into_session() {
                Ok(session) => {
                    info!(path = %path.display(), present = session.is_some(), "loaded credential store");
                    session
                }
                Err(reason) => {
                    warn!(path = %path.display(), reason, "resetting inconsistent credential file");
                    write_atomic(&path, &StoredRecord::default()).await?;
                    None
                }
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting logged out");
            write_atomic(&path, &StoredRecord::default()).await?;
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a new pair and its claims as one unit.
    pub async fn save(&self, pair: CredentialPair, claims: Option<Claims>) -> Result<()> {
        let mut state = self.state.lock().await;
        let next = StoredSession { pair, claims };
        write_atomic(&self.path, &StoredRecord::from_session(Some(&next))?).await?;
        *state = Some(next);
        debug!("saved credential pair");
        Ok(())
    }

    /// Currently persisted pair and claims, if any.
    pub async fn load(&self) -> Option<StoredSession> {
        self.state.lock().await.clone()
    }

    pub async fn access_token(&self) -> Option<Secret<String>> {
        let state = self.state.lock().await;
        state.as_ref().map(|s| s.pair.access_token.clone())
    }

    pub async fn refresh_token(&self) -> Option<Secret<String>> {
        let state = self.state.lock().await;
        state.as_ref().map(|s| s.pair.refresh_token.clone())
    }

    pub async fn claims(&self) -> Option<Claims> {
        let state = self.state.lock().await;
        state.as_ref().and_then(|s| s.claims.clone())
    }

    /// Replace cached claims without touching the pair.
    ///
    /// Fails with `NotFound` when logged out: claims are never persisted
    /// without a pair.
    pub async fn update_claims(&self, claims: Claims) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state
            .as_ref()
            .ok_or_else(|| Error::NotFound("no credential pair to attach claims to".into()))?;
        let next = StoredSession {
            pair: current.pair.clone(),
            claims: Some(claims),
        };
        write_atomic(&self.path, &StoredRecord::from_session(Some(&next))?).await?;
        *state = Some(next);
        debug!("updated cached claims");
        Ok(())
    }

    /// Swap in a renewed pair only if the stored refresh credential is still
    /// `expected_refresh`. Cached claims carry over.
    ///
    /// Returns the new stored session, or `None` when the store was cleared or
    /// replaced by a different login while the exchange was in flight.
    pub async fn replace_if_current(
        &self,
        expected_refresh: &str,
        pair: CredentialPair,
    ) -> Result<Option<StoredSession>> {
        let mut state = self.state.lock().await;
        let claims = match state.as_ref() {
            Some(current) if current.pair.refresh_token.matches(&expected_refresh.to_string()) => {
                current.claims.clone()
            }
            _ => {
                debug!("stored refresh credential changed, discarding renewed pair");
                return Ok(None);
            }
        };
        let next = StoredSession { pair, claims };
        write_atomic(&self.path, &StoredRecord::from_session(Some(&next))?).await?;
        *state = Some(next.clone());
        debug!("replaced credential pair after renewal");
        Ok(Some(next))
    }

    /// Remove all fields. Calling this on an empty store is a no-op.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            return Ok(());
        }
        write_atomic(&self.path, &StoredRecord::default()).await?;
        *state = None;
        debug!("cleared credential store");
        Ok(())
    }

    /// Clear only if the stored refresh credential is still `expected_refresh`.
    ///
    /// Returns true when the store ends up empty (cleared now or already
    /// empty), false when a different login's pair is stored and was kept.
    pub async fn clear_if_current(&self, expected_refresh: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.as_ref() {
            None => return Ok(true),
            Some(current) if !current.pair.refresh_token.matches(&expected_refresh.to_string()) => {
                return Ok(false);
            }
            Some(_) => {}
        }
        write_atomic(&self.path, &StoredRecord::default()).await?;
        *state = None;
        debug!("cleared credential store after failed renewal");
        Ok(true)
    }

    /// True iff a pair exists and `now < expires_at`.
    ///
    /// Only consulted when restoring a session at startup. During a session
    /// the backend's unauthorized response decides liveness, not the clock.
    pub async fn is_live_at(&self, now: u64) -> bool {
        let state = self.state.lock().await;
        state.as_ref().is_some_and(|s| s.pair.is_live_at(now))
    }

    pub async fn is_live(&self) -> bool {
        self.is_live_at(now_millis()).await
    }
}

/// Write the record to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets 0600 permissions since the file contains bearer tokens.
async fn write_atomic(path: &Path, record: &StoredRecord) -> Result<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "session".into());
    let tmp_path = dir.join(format!(".{name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    Ok(())
}
