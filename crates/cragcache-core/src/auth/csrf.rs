use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Cookie carrying the issued token.
pub const CSRF_COOKIE_NAME: &str = "csrf_token";

/// Header the client echoes the token in.
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Value of the `action` claim on every CSRF token.
pub const CSRF_ACTION: &str = "csrf";

/// Tokens (and their cookie) live for 2 hours.
pub const CSRF_TOKEN_TTL_SECS: i64 = 2 * 60 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CsrfError {
    #[error("CSRF token missing from header or cookie")]
    Missing,

    #[error("CSRF header and cookie do not match")]
    Mismatch,

    #[error("CSRF token invalid: {0}")]
    Invalid(String),

    #[error("Token is not a CSRF token")]
    WrongAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfClaims {
    pub action: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Issues and verifies HS256-signed CSRF tokens.
#[derive(Clone)]
pub struct CsrfTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl CsrfTokens {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// A random hex secret, for when none is configured.
    pub fn generate_secret() -> String {
        hex::encode(rand::random::<[u8; 32]>())
    }

    /// Issue a token valid for `CSRF_TOKEN_TTL_SECS` from now.
    pub fn issue(&self) -> Result<String, CsrfError> {
        self.issue_at(Utc::now())
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<String, CsrfError> {
        let iat = now.timestamp();
        let claims = CsrfClaims {
            action: CSRF_ACTION.to_string(),
            iat,
            exp: iat + CSRF_TOKEN_TTL_SECS,
            jti: hex::encode(rand::random::<[u8; 16]>()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CsrfError::Invalid(e.to_string()))
    }

    /// Check a token's signature, expiry and `action` claim.
    pub fn verify_token(&self, token: &str) -> Result<CsrfClaims, CsrfError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<CsrfClaims>(token, &self.decoding, &validation)
            .map_err(|e| CsrfError::Invalid(e.to_string()))?;

        if data.claims.action != CSRF_ACTION {
            return Err(CsrfError::WrongAction);
        }
        Ok(data.claims)
    }

    /// Double-submit check: header and cookie must both be present, equal,
    /// and carry a valid token.
    pub fn verify(&self, header: Option<&str>, cookie: Option<&str>) -> Result<CsrfClaims, CsrfError> {
        let (header, cookie) = match (header, cookie) {
            (Some(h), Some(c)) if !h.is_empty() && !c.is_empty() => (h, c),
            _ => return Err(CsrfError::Missing),
        };
        if header != cookie {
            debug!("CSRF header/cookie mismatch");
            return Err(CsrfError::Mismatch);
        }
        self.verify_token(header)
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn set_cookie_header(token: &str, secure: bool) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
            CSRF_COOKIE_NAME, token, CSRF_TOKEN_TTL_SECS
        );
        if secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Find cookie `name` in a `Cookie` request header.
pub fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn tokens() -> CsrfTokens {
        CsrfTokens::new(b"test-secret-for-csrf")
    }

    #[test]
    fn test_matching_valid_token_accepted() {
        let csrf = tokens();
        let token = csrf.issue().unwrap();
        let claims = csrf.verify(Some(&token), Some(&token)).unwrap();
        assert_eq!(claims.action, "csrf");
        assert_eq!(claims.exp - claims.iat, 7200);
    }

    #[test]
    fn test_missing_pieces_rejected() {
        let csrf = tokens();
        let token = csrf.issue().unwrap();
        assert_eq!(csrf.verify(None, Some(&token)), Err(CsrfError::Missing));
        assert_eq!(csrf.verify(Some(&token), None), Err(CsrfError::Missing));
        assert_eq!(csrf.verify(Some(""), Some("")), Err(CsrfError::Missing));
    }

    #[test]
    fn test_mismatch_rejected() {
        let csrf = tokens();
        let a = csrf.issue().unwrap();
        let b = csrf.issue().unwrap();
        assert_ne!(a, b);
        assert_eq!(csrf.verify(Some(&a), Some(&b)), Err(CsrfError::Mismatch));
    }

    #[test]
    fn test_expired_token_rejected() {
        let csrf = tokens();
        let token = csrf.issue_at(Utc::now() - Duration::hours(2) - Duration::seconds(5)).unwrap();
        assert!(matches!(csrf.verify(Some(&token), Some(&token)), Err(CsrfError::Invalid(_))));

        let fresh = csrf.issue_at(Utc::now() - Duration::minutes(119)).unwrap();
        assert!(csrf.verify(Some(&fresh), Some(&fresh)).is_ok());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let token = CsrfTokens::new(b"another-secret").issue().unwrap();
        let csrf = tokens();
        assert!(matches!(csrf.verify(Some(&token), Some(&token)), Err(CsrfError::Invalid(_))));
        assert!(matches!(csrf.verify(Some("garbage"), Some("garbage")), Err(CsrfError::Invalid(_))));
    }

    #[test]
    fn test_wrong_action_rejected() {
        let secret = b"test-secret-for-csrf";
        let now = Utc::now().timestamp();
        let claims = CsrfClaims {
            action: "login".to_string(),
            iat: now,
            exp: now + 60,
            jti: "x".to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap();
        assert_eq!(tokens().verify(Some(&token), Some(&token)), Err(CsrfError::WrongAction));
    }

    #[test]
    fn test_cookie_helpers() {
        let header = CsrfTokens::set_cookie_header("abc", true);
        assert_eq!(header, "csrf_token=abc; HttpOnly; SameSite=Strict; Path=/; Max-Age=7200; Secure");
        assert_eq!(cookie_value("theme=dark; csrf_token=abc.def", "csrf_token"), Some("abc.def"));
        assert_eq!(cookie_value("theme=dark", "csrf_token"), None);
    }
}
