//! Identity backend contract
//!
//! Thin typed wrappers over the `/api/auth` endpoints. Login, register and
//! refresh are unauthenticated; `me` takes an explicit bearer credential so
//! the renewal path can call it without going through the request gateway.
//! Revoke is an ordinary protected call and only its wire types live here.

use common::Secret;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::constants::{LOGIN_PATH, ME_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::credentials::Claims;
use crate::error::{Error, Result};

/// Response from login, register and refresh.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(serialize_with = "expose_secret")]
    pub password: Secret<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    #[serde(serialize_with = "expose_secret")]
    pub password: Secret<String>,
    pub first_name: String,
    pub last_name: String,
}

/// Passwords go on the wire in clear; everywhere else they stay redacted.
fn expose_secret<S: Serializer>(secret: &Secret<String>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose())
}

/// Body of the refresh exchange: the stale access credential plus the
/// refresh credential.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest<'a> {
    pub access_token: &'a str,
    pub refresh_token: &'a str,
}

/// Body of `POST /api/auth/revoke`. Revocation is a protected call and goes
/// through the request gateway, not `AuthApi`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// `{"message": ...}` body used by revoke and by error responses.
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Body of `GET /api/auth/me`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRolesResponse {
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<UserRolesResponse> for Claims {
    fn from(response: UserRolesResponse) -> Self {
        Claims::new(response.email, response.roles)
    }
}

/// Client for the identity endpoints.
#[derive(Debug, Clone)]
pub struct AuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl AuthApi {
    /// `client` carries the transport timeout; `base_url` has no trailing path.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Absolute URL for a backend path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchange email + password for a credential pair.
    pub async fn login(&self, request: &LoginRequest) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport("login request failed", &e))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(Error::InvalidCredentials("Invalid email or password.".into()));
        }
        if status.is_client_error() {
            let message = error_message(response, "Login failed. Please try again.").await;
            return Err(Error::InvalidCredentials(message));
        }
        if !status.is_success() {
            let message = error_message(response, "An error occurred. Please try again.").await;
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        debug!(email = %request.email, "login accepted");
        parse_token_response(response, "login").await
    }

    /// Create an account and sign in as it.
    pub async fn register(&self, request: &RegisterRequest) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.url(REGISTER_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport("register request failed", &e))?;

        let status = response.status();
        if status.is_client_error() {
            let message = error_message(
                response,
                "An error occurred during registration. Please try again.",
            )
            .await;
            return Err(Error::InvalidCredentials(message));
        }
        if !status.is_success() {
            let message = error_message(
                response,
                "An error occurred during registration. Please try again.",
            )
            .await;
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        debug!(email = %request.email, "registration accepted");
        parse_token_response(response, "register").await
    }

    /// Exchange the refresh credential for a new pair.
    ///
    /// 401/403 mean the refresh credential is revoked or invalid.
    pub async fn refresh(&self, request: &RefreshTokenRequest<'_>) -> Result<TokenResponse> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::transport("token refresh request failed", &e))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }
        if !status.is_success() {
            let message = error_message(response, "refresh failed").await;
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        parse_token_response(response, "refresh").await
    }

    /// Fetch the principal and roles for `access_token`.
    pub async fn me(&self, access_token: &str) -> Result<Claims> {
        let response = self
            .client
            .get(self.url(ME_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::transport("claims request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response, "claims request failed").await;
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<UserRolesResponse>()
            .await
            .map(Claims::from)
            .map_err(|e| Error::CredentialParse(format!("invalid claims response: {e}")))
    }
}

async fn parse_token_response(response: reqwest::Response, operation: &str) -> Result<TokenResponse> {
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::CredentialParse(format!("invalid {operation} response: {e}")))
}

/// Prefer the backend's `{"message": ...}` body; fall back to `default`.
async fn error_message(response: reqwest::Response, default: &str) -> String {
    match response.json::<MessageResponse>().await {
        Ok(body) if !body.message.is_empty() => body.message,
        _ => default.to_string(),
    }
}
