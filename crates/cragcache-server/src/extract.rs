//! Request guards run before handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Query, Request};
use axum::http::{header, request::Parts, HeaderMap};
use axum::Json;
use cragcache_core::api::{ApiError, BackendClient};
use cragcache_core::auth::{cookie_value, CsrfClaims, CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request passed the double-submit CSRF check.
#[derive(Debug)]
pub struct CsrfVerified(pub CsrfClaims);

impl FromRequestParts<AppState> for CsrfVerified {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_token = parts
            .headers
            .get(CSRF_HEADER_NAME)
            .and_then(|v| v.to_str().ok());
        let cookie_token = request_cookie(&parts.headers, CSRF_COOKIE_NAME);

        let claims = state.csrf.verify(header_token, cookie_token)?;
        Ok(CsrfVerified(claims))
    }
}

/// The signed-in user, resolved from the bearer token, with a backend
/// client acting on their behalf.
pub struct AuthUser {
    pub id: String,
    pub backend: BackendClient,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AppError::Unauthenticated)?;

        let user = match state.backend.current_user(token).await {
            Ok(user) => user,
            Err(e) => {
                if let Some(ApiError::Unauthorized | ApiError::AccessDenied(_)) = e.downcast_ref::<ApiError>() {
                    debug!("Bearer token rejected by backend");
                    return Err(AppError::Unauthenticated);
                }
                return Err(e.into());
            }
        };

        Ok(AuthUser {
            id: user.id,
            backend: state.backend.with_token(token.to_string()),
        })
    }
}

/// Identity used for per-client rate limiting: the peer address, or the
/// first `X-Forwarded-For` entry when the server runs behind a trusted proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl FromRequestParts<AppState> for ClientKey {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(client_key(parts, state.trust_proxy))
    }
}

fn client_key(parts: &Parts, trust_proxy: bool) -> ClientKey {
    if trust_proxy {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return ClientKey(addr.to_string());
        }
    }

    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    ClientKey(peer.unwrap_or_else(|| "unknown".to_string()))
}

/// `Json` whose rejections are reported as validation errors.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ValidJson(value))
    }
}

/// `Query` whose rejections are reported as validation errors.
pub struct ValidQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ValidQuery(value))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn request_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| cookie_value(v, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }

    #[test]
    fn test_request_cookie_across_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(header::COOKIE, HeaderValue::from_static("a=1; csrf_token=tok"));
        assert_eq!(request_cookie(&headers, "csrf_token"), Some("tok"));
        assert_eq!(request_cookie(&headers, "missing"), None);
    }

    fn parts(forwarded_for: Option<&str>, peer: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder();
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(()).unwrap();
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        request.into_parts().0
    }

    #[test]
    fn test_client_key_ignores_forwarded_for_by_default() {
        let request = parts(Some("203.0.113.7"), Some("198.51.100.9:4000"));
        assert_eq!(client_key(&request, false), ClientKey("198.51.100.9".to_string()));
        assert_eq!(client_key(&parts(None, None), false), ClientKey("unknown".to_string()));
    }

    #[test]
    fn test_client_key_behind_trusted_proxy() {
        let request = parts(Some("203.0.113.7, 10.0.0.1"), Some("10.0.0.1:4000"));
        assert_eq!(client_key(&request, true), ClientKey("203.0.113.7".to_string()));

        let request = parts(None, Some("10.0.0.1:4000"));
        assert_eq!(client_key(&request, true), ClientKey("10.0.0.1".to_string()));
    }
}
