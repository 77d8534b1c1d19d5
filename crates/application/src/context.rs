use domain::{AccountId, ServerError, ServerErrorCode};

/// 单个请求的调用上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub account_id: Option<AccountId>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            account_id: None,
        }
    }

    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    /// 未携带有效令牌时返回 `TokenInvalid`
    pub fn require_account(&self) -> Result<&AccountId, ServerError> {
        self.account_id
            .as_ref()
            .ok_or_else(|| ServerError::new(ServerErrorCode::TokenInvalid, "missing session token"))
    }
}
