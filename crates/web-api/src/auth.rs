//! 请求标识与会话令牌提取
//!
//! 令牌可以放在 `Authorization: Bearer` 头里，也可以放在 `qlive_token` cookie 里。

use application::RequestContext;
use axum::{
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, Extensions, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use domain::{AccountId, ServerError, ServerErrorCode, SessionToken};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

pub const REQUEST_ID_HEADER: &str = "x-reqid";
pub const TOKEN_COOKIE: &str = "qlive_token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// 沿用调用方传入的请求 ID，没有时生成一个，并写回响应头
pub async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// 读取中间件分配的请求 ID
pub(crate) fn request_id_from(extensions: &Extensions) -> String {
    extensions
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string())
}

pub fn extract_token(headers: &HeaderMap) -> Option<SessionToken> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(SessionToken::new(token));
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| SessionToken::new(value))
}

/// 未登录请求的上下文
#[derive(Debug, Clone)]
pub struct Anonymous(pub RequestContext);

impl FromRequestParts<AppState> for Anonymous {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(RequestContext::new(request_id_from(&parts.extensions))))
    }
}

/// 已通过令牌认证的请求
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub context: RequestContext,
    pub account_id: AccountId,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = request_id_from(&parts.extensions);
        let token = extract_token(&parts.headers).ok_or_else(|| {
            ApiError::from_server(
                ServerError::new(ServerErrorCode::TokenInvalid, "missing session token"),
                &request_id,
            )
        })?;

        let account_id = state
            .account_service
            .resolve_token(&token)
            .await
            .map_err(|err| ApiError::from_server(err, &request_id))?;

        Ok(Self {
            context: RequestContext::new(request_id).with_account(account_id.clone()),
            account_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token(&headers), Some(SessionToken::new("abc123")));
    }

    #[test]
    fn test_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; qlive_token=tok456; lang=zh"),
        );
        assert_eq!(extract_token(&headers), Some(SessionToken::new("tok456")));
    }

    #[test]
    fn test_missing_token() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("qlive_token="));
        assert_eq!(extract_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic xyz"));
        assert_eq!(extract_token(&headers), None);
    }
}
