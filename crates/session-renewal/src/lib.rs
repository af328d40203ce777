//! Single-flight credential renewal
//!
//! Turns any number of concurrent "my access credential was rejected" signals
//! into exactly one refresh exchange, and hands its single result to every
//! caller that asked.
//!
//! Renewal lifecycle:
//! 1. Caller asks for renewal → joins the in-flight exchange if there is one
//! 2. Otherwise the coordinator reads the refresh credential and starts one
//! 3. Success → store swap, session adopt, handle cleared, waiters released
//! 4. Failure → store cleared, session reset, handle cleared, waiters released
//!    with the same error

pub mod coordinator;

pub use coordinator::RenewalCoordinator;
pub use session_auth::{Error, Result};
