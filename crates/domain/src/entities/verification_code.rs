use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{saturating_add, PhoneNumber, Timestamp};

/// 一次性短信验证码，每个手机号同时只保留最新一条。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCode {
    pub phone_number: PhoneNumber,
    pub code: String,
    pub sent_at: Timestamp,
    pub expires_at: Timestamp,
}

impl VerificationCode {
    pub fn issue(phone_number: PhoneNumber, code: String, now: Timestamp, ttl: Duration) -> Self {
        Self {
            phone_number,
            code,
            sent_at: now,
            expires_at: saturating_add(now, ttl),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// 重发间隔从 sent_at 开始计算
    pub fn resend_allowed(&self, now: Timestamp, min_interval: Duration) -> bool {
        now >= saturating_add(self.sent_at, min_interval)
    }

    pub fn accepts(&self, code: &str, now: Timestamp) -> bool {
        !self.is_expired(now) && self.code == code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_code_window_and_expiry() {
        let now = Utc::now();
        let code = VerificationCode::issue(
            PhoneNumber::parse("13800000000").unwrap(),
            "123456".to_string(),
            now,
            Duration::minutes(5),
        );

        assert!(code.accepts("123456", now + Duration::minutes(4)));
        assert!(!code.accepts("654321", now));
        assert!(!code.accepts("123456", now + Duration::minutes(5)));

        assert!(!code.resend_allowed(now + Duration::seconds(59), Duration::seconds(60)));
        assert!(code.resend_allowed(now + Duration::seconds(60), Duration::seconds(60)));
    }
}
