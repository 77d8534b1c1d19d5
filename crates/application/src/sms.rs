use async_trait::async_trait;
use domain::PhoneNumber;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmsError {
    #[error("sms gateway rejected request: {0}")]
    Rejected(String),
    #[error("sms transport failure: {0}")]
    Transport(String),
}

/// 短信下发通道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send_code(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), SmsError>;
}
