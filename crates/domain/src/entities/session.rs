use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{saturating_add, AccountId, SessionToken, Timestamp};

/// 已登录账号的服务端会话记录，每个账号最多一条。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub account_id: AccountId,
    pub token: SessionToken,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
}

impl ActiveSession {
    pub fn issue(
        account_id: AccountId,
        token: SessionToken,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self {
            account_id,
            token,
            issued_at: now,
            expires_at: saturating_add(now, ttl),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}
