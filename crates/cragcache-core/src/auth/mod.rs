//! Request authentication helpers.
//!
//! This module provides `CsrfTokens`: issuing and checking the signed,
//! two-hour double-submit tokens that guard every mutating endpoint.

pub mod csrf;

pub use csrf::{
    cookie_value, CsrfClaims, CsrfError, CsrfTokens, CSRF_ACTION, CSRF_COOKIE_NAME,
    CSRF_HEADER_NAME, CSRF_TOKEN_TTL_SECS,
};
