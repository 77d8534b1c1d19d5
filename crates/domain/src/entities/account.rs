use serde::{Deserialize, Serialize};

use crate::value_objects::{AccountId, PhoneNumber, Timestamp};

/// 账号，首次验证手机号成功时创建，不会被删除。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub phone_number: PhoneNumber,
    pub nickname: String,
    pub gender: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Account {
    pub fn register(id: AccountId, phone_number: PhoneNumber, now: Timestamp) -> Self {
        Self {
            id,
            phone_number,
            nickname: String::new(),
            gender: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 只覆盖非空字段
    pub fn apply_profile(&mut self, update: &ProfileUpdate, now: Timestamp) {
        if let Some(nickname) = update.nickname() {
            self.nickname = nickname.to_owned();
        }
        if let Some(gender) = update.gender() {
            self.gender = gender.to_owned();
        }
        self.updated_at = now;
    }

    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            nickname: self.nickname.clone(),
            gender: self.gender.clone(),
        }
    }
}

/// 资料修改，空字符串视为未提供
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
}

impl ProfileUpdate {
    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref().filter(|value| !value.is_empty())
    }

    pub fn gender(&self) -> Option<&str> {
        self.gender.as_deref().filter(|value| !value.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.nickname().is_none() && self.gender().is_none()
    }
}

/// 返回给客户端的账号信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub nickname: String,
    pub gender: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn account() -> Account {
        Account::register(
            AccountId::new("a1b2c3d4e5f6"),
            PhoneNumber::parse("13800000000").unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_empty_fields_do_not_overwrite() {
        let mut account = account();
        account.apply_profile(
            &ProfileUpdate {
                nickname: Some("alice".to_string()),
                gender: Some("female".to_string()),
            },
            Utc::now(),
        );

        account.apply_profile(
            &ProfileUpdate {
                nickname: Some(String::new()),
                gender: None,
            },
            Utc::now(),
        );

        assert_eq!(account.nickname, "alice");
        assert_eq!(account.gender, "female");
    }

    #[test]
    fn test_profile_update_emptiness() {
        assert!(ProfileUpdate::default().is_empty());
        assert!(ProfileUpdate {
            nickname: Some(String::new()),
            gender: Some(String::new()),
        }
        .is_empty());
        assert!(!ProfileUpdate {
            nickname: None,
            gender: Some("male".to_string()),
        }
        .is_empty());
    }
}
