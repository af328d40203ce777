//! Credential and session primitives for the admin UI backend
//!
//! Provides the durable credential store, the observable session state, the
//! identity backend HTTP contract, and the pre-request validation gates. This
//! crate has no knowledge of renewal or request replay; those live in
//! `session-renewal` and `session-client`.
//!
//! Credential flow:
//! 1. UI submits a login form, gated by `validation::validate_login()`
//! 2. `api::AuthApi::login()` returns a token response
//! 3. Pair persisted via `credentials::CredentialStore::save()`
//! 4. Session flipped via `session::SessionState::adopt()`
//! 5. Renewal swaps the pair via `CredentialStore::replace_if_current()`
//! 6. Logout clears via `CredentialStore::clear()` + `SessionState::reset()`

pub mod api;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod session;
pub mod validation;

pub use api::{
    AuthApi, LoginRequest, MessageResponse, RefreshTokenRequest, RegisterRequest,
    RevokeTokenRequest, TokenResponse, UserRolesResponse,
};
pub use constants::*;
pub use credentials::{Claims, CredentialPair, CredentialStore, StoredSession, now_millis};
pub use error::{Error, Result};
pub use session::{SessionSnapshot, SessionState};
pub use validation::{validate_login, validate_registration};
