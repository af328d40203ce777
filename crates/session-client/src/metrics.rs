//! Gateway metrics
//!
//! - `gateway_requests_total` (counter): label `outcome`, one of
//!   `passthrough`, `replayed`, `unauthorized`, `renewal_failed`,
//!   `transport_error`
//!
//! Renewal outcomes are counted by the coordinator under
//! `session_renewals_total`. Without an installed recorder these are no-ops.

/// Outcome of one gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// Response returned without renewal (any status but a handled 401)
    Passthrough,
    /// Renewed once and replayed; the replay's response was returned
    Replayed,
    /// 401 with no refresh credential, returned as-is
    Unauthorized,
    RenewalFailed,
    TransportError,
}

impl GatewayOutcome {
    pub fn label(self) -> &'static str {
        match self {
            GatewayOutcome::Passthrough => "passthrough",
            GatewayOutcome::Replayed => "replayed",
            GatewayOutcome::Unauthorized => "unauthorized",
            GatewayOutcome::RenewalFailed => "renewal_failed",
            GatewayOutcome::TransportError => "transport_error",
        }
    }
}

pub fn record_gateway(outcome: GatewayOutcome) {
    metrics::counter!("gateway_requests_total", "outcome" => outcome.label()).increment(1);
}
