//! Request gateway
//!
//! Every protected API call passes through `RequestGateway::send`:
//! 1. Allow-listed auth endpoints go out untouched and are never intercepted
//! 2. Otherwise the stored access credential (if any) is attached as Bearer
//! 3. Any response other than 401 is returned verbatim
//! 4. On 401 with a refresh credential stored, the renewal coordinator is
//!    asked for a fresh pair and the original call is replayed exactly once;
//!    the replay's response is returned whatever it is
//! 5. On renewal failure the renewal error replaces the 401

use std::sync::Arc;

use common::Secret;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use session_auth::{CredentialStore, Error, Result, UNAUTHENTICATED_PATHS};
use session_renewal::RenewalCoordinator;
use tracing::{Instrument, debug, info_span, warn};

use crate::metrics::{GatewayOutcome, record_gateway};
use crate::request::ApiRequest;

/// True for the login, register and refresh endpoints.
pub fn is_unauthenticated(route: &str) -> bool {
    let route = route.split('?').next().unwrap_or(route);
    let route = route.trim_end_matches('/');
    UNAUTHENTICATED_PATHS.iter().any(|p| *p == route)
}

/// Single choke point for outbound backend calls.
#[derive(Clone)]
pub struct RequestGateway {
    client: reqwest::Client,
    base_url: String,
    store: Arc<CredentialStore>,
    coordinator: RenewalCoordinator,
}

impl RequestGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, coordinator: RenewalCoordinator) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            store: coordinator.store().clone(),
            coordinator,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `request`, renewing and replaying once on 401.
    pub async fn send(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        let span = info_span!(
            "gateway",
            request_id = %request_id,
            method = %request.method(),
            path = %request.route()
        );
        self.send_inner(request).instrument(span).await
    }

    async fn send_inner(&self, request: &ApiRequest) -> Result<reqwest::Response> {
        if is_unauthenticated(request.route()) {
            let response = self.dispatch(request, None).await?;
            record_gateway(GatewayOutcome::Passthrough);
            return Ok(response);
        }

        let access = self.store.access_token().await;
        let response = self.dispatch(request, access.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            record_gateway(GatewayOutcome::Passthrough);
            return Ok(response);
        }

        if self.store.refresh_token().await.is_none() {
            debug!("unauthorized with no refresh credential, returning as-is");
            record_gateway(GatewayOutcome::Unauthorized);
            return Ok(response);
        }

        debug!("unauthorized, renewing credential");
        let rejected = access.as_ref().map(|a| a.expose().as_str());
        let pair = match self.coordinator.renew_rejected(rejected).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "renewal failed, surfacing to caller");
                record_gateway(GatewayOutcome::RenewalFailed);
                return Err(e);
            }
        };

        // Exactly one replay. A second 401 is returned verbatim.
        let replay = self.dispatch(request, Some(&pair.access_token)).await?;
        debug!(status = replay.status().as_u16(), "replayed after renewal");
        record_gateway(GatewayOutcome::Replayed);
        Ok(replay)
    }

    /// Send and decode a JSON body, mapping non-2xx statuses to `Error::Status`.
    pub async fn json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Status {
                status: status.as_u16(),
                message: format!("invalid response body: {e}"),
            })
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        access: Option<&Secret<String>>,
    ) -> Result<reqwest::Response> {
        let builder = request.build(
            &self.client,
            &self.base_url,
            access.map(|token| token.expose().as_str()),
        )?;
        builder.send().await.map_err(|e| {
            record_gateway(GatewayOutcome::TransportError);
            Error::transport("backend request failed", &e)
        })
    }
}
