//! Session-aware client for the admin UI backend
//!
//! The UI layer talks to the backend exclusively through this crate:
//! - `SessionClient` owns login, registration, logout and claims refresh
//! - `RequestGateway` is the single choke point for protected API calls,
//!   attaching the bearer credential and replaying once after renewal
//! - `ApiRequest` is a replayable description of one outbound call
//!
//! HTTP statuses are data, not errors: the gateway returns the backend's
//! response verbatim (including a second 401 after renewal). Only transport
//! failures and renewal failures surface as `Err`.

pub mod client;
pub mod gateway;
pub mod metrics;
pub mod request;

pub use client::SessionClient;
pub use gateway::{RequestGateway, is_unauthenticated};
pub use request::ApiRequest;
pub use session_auth::{
    Claims, Error, LoginRequest, RegisterRequest, Result, SessionSnapshot,
};
