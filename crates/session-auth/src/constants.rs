//! Backend endpoint paths, storage keys, and well-known role names

/// Login endpoint (unauthenticated)
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Registration endpoint (unauthenticated)
pub const REGISTER_PATH: &str = "/api/auth/register";

/// Refresh exchange endpoint (unauthenticated)
pub const REFRESH_PATH: &str = "/api/auth/refresh";

/// Refresh credential revocation, called on logout
pub const REVOKE_PATH: &str = "/api/auth/revoke";

/// Current principal and roles
pub const ME_PATH: &str = "/api/auth/me";

/// Endpoints that never carry a bearer credential and whose responses are
/// never intercepted. Intercepting the refresh exchange itself would recurse
/// back into renewal.
pub const UNAUTHENTICATED_PATHS: &[&str] = &[LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// Persisted key holding the access credential
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Persisted key holding the refresh credential
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Persisted key holding the absolute expiry (epoch milliseconds, as a string)
pub const TOKEN_EXPIRY_KEY: &str = "tokenExpiry";

/// Persisted key holding the JSON-encoded principal and role list
pub const CLAIMS_KEY: &str = "claims";

/// Role granting administrative actions in the UI
pub const ADMIN_ROLE: &str = "Admin";

/// Minimum password length accepted by the registration gate
pub const MIN_PASSWORD_LEN: usize = 6;
