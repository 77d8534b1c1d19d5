use application::{SmsError, SmsGateway};
use async_trait::async_trait;
use domain::PhoneNumber;
use tracing::{debug, info};

/// 不接入真实短信平台，只把验证码写进日志，用于开发环境。
#[derive(Debug, Default, Clone)]
pub struct LogSmsGateway;

#[async_trait]
impl SmsGateway for LogSmsGateway {
    async fn send_code(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), SmsError> {
        info!(phone = %phone_number.masked(), "sms code dispatched");
        debug!(phone = %phone_number.masked(), code, "sms code content");
        Ok(())
    }
}
