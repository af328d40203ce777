//! Pre-request gates for the login and registration forms
//!
//! A rejected form never reaches the backend and never changes session state.

use crate::api::{LoginRequest, RegisterRequest};
use crate::constants::MIN_PASSWORD_LEN;
use crate::error::{Error, Result};

pub fn validate_login(request: &LoginRequest) -> Result<()> {
    if request.email.trim().is_empty() || request.password.expose().is_empty() {
        return Err(Error::Validation("Email and password are required.".into()));
    }
    Ok(())
}

/// `confirm_password` is the form's second password field; it is never sent.
pub fn validate_registration(request: &RegisterRequest, confirm_password: &str) -> Result<()> {
    if request.email.trim().is_empty()
        || request.password.expose().is_empty()
        || request.first_name.trim().is_empty()
        || request.last_name.trim().is_empty()
    {
        return Err(Error::Validation("All fields are required.".into()));
    }

    if request.password.expose() != confirm_password {
        return Err(Error::Validation("Passwords do not match.".into()));
    }

    if request.password.expose().chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long."
        )));
    }

    Ok(())
}
