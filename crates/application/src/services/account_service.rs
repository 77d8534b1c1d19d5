use std::sync::Arc;

use chrono::Duration;
use domain::{
    Account, AccountId, AccountSummary, ActiveSession, PhoneNumber, ProfileUpdate,
    RepositoryError, ServerError, ServerErrorCode, ServerResult, SessionToken, UniqueKey,
    VerificationCode,
};
use tracing::{error, info, warn};

use crate::{
    clock::Clock,
    id_generator::{
        IdGenerator, UniqueInsertError, ACCOUNT_ID_LEN, SESSION_TOKEN_LEN, SMS_CODE_LEN,
    },
    repository::{AccountRepository, SessionRepository, VerificationCodeRepository},
    sms::SmsGateway,
};

/// 会话与验证码的时效
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSettings {
    pub session_ttl: Duration,
    pub code_ttl: Duration,
    pub resend_interval: Duration,
}

impl AccountSettings {
    pub fn from_config(auth: &config::AuthConfig) -> Self {
        Self {
            session_ttl: seconds(auth.session_ttl_secs),
            code_ttl: seconds(auth.code_ttl_secs),
            resend_interval: seconds(auth.resend_interval_secs),
        }
    }
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self::from_config(&config::AuthConfig::default())
    }
}

pub(crate) fn seconds(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// 登录成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub token: SessionToken,
    pub account: AccountSummary,
}

pub struct AccountServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub session_repository: Arc<dyn SessionRepository>,
    pub code_repository: Arc<dyn VerificationCodeRepository>,
    pub sms_gateway: Arc<dyn SmsGateway>,
    pub id_generator: Arc<IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub settings: AccountSettings,
}

pub struct AccountService {
    deps: AccountServiceDependencies,
}

impl AccountService {
    pub fn new(deps: AccountServiceDependencies) -> Self {
        Self { deps }
    }

    /// 生成并下发验证码，同一手机号在重发间隔内只能发送一次。
    pub async fn send_verification_code(&self, phone_number: &str) -> ServerResult<()> {
        let phone = PhoneNumber::parse(phone_number)?;
        let code = self.deps.id_generator.numeric_code(SMS_CODE_LEN);
        let now = self.deps.clock.now();

        let record = VerificationCode::issue(
            phone.clone(),
            code.clone(),
            now,
            self.deps.settings.code_ttl,
        );
        match self
            .deps
            .code_repository
            .store_if_resend_allowed(record, self.deps.settings.resend_interval)
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(UniqueKey::RecentCode)) => {
                return Err(ServerError::new(
                    ServerErrorCode::TooFrequent,
                    format!("sms code for {} sent too recently", phone.masked()),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        if let Err(err) = self.deps.sms_gateway.send_code(&phone, &code).await {
            error!(phone = %phone.masked(), error = %err, "failed to send sms code");
            if let Err(discard_err) = self.deps.code_repository.discard(&phone, &code).await {
                warn!(
                    phone = %phone.masked(),
                    error = %discard_err,
                    "failed to discard unsent sms code"
                );
            }
            return Err(ServerError::new(ServerErrorCode::SmsSendFailed, err.to_string()));
        }

        info!(phone = %phone.masked(), "sms code sent");
        Ok(())
    }

    /// 校验并消费验证码，同一验证码只能使用一次。
    pub async fn validate_code(&self, phone_number: &str, code: &str) -> ServerResult<PhoneNumber> {
        let phone = PhoneNumber::parse(phone_number)?;
        let now = self.deps.clock.now();

        let consumed = self.deps.code_repository.consume(&phone, code, now).await?;
        if !consumed {
            return Err(ServerError::new(
                ServerErrorCode::InvalidCode,
                format!("sms code mismatch or expired for {}", phone.masked()),
            ));
        }
        Ok(phone)
    }

    /// 验证码登录，首次登录时创建账号。
    pub async fn login(&self, phone_number: &str, code: &str) -> ServerResult<LoginOutcome> {
        let phone = self.validate_code(phone_number, code).await?;
        let now = self.deps.clock.now();

        let account = self
            .deps
            .id_generator
            .insert_unique(ACCOUNT_ID_LEN, |id| {
                self.deps
                    .account_repository
                    .insert_if_absent(Account::register(AccountId::new(id), phone.clone(), now))
            })
            .await?;

        let session = self
            .deps
            .id_generator
            .insert_unique(SESSION_TOKEN_LEN, |token| {
                self.deps.session_repository.create_exclusive(
                    ActiveSession::issue(
                        account.id.clone(),
                        SessionToken::new(token),
                        now,
                        self.deps.settings.session_ttl,
                    ),
                    now,
                )
            })
            .await
            .map_err(|err| match err {
                UniqueInsertError::Repository(RepositoryError::Conflict(
                    UniqueKey::ActiveSession,
                )) => ServerError::new(
                    ServerErrorCode::AlreadyLoggedIn,
                    format!("account {} already has an active session", account.id),
                ),
                other => other.into(),
            })?;

        info!(account_id = %account.id, phone = %phone.masked(), "account logged in");
        Ok(LoginOutcome {
            token: session.token,
            account: account.summary(),
        })
    }

    /// 删除会话，返回之前是否处于登录状态。重复调用没有副作用。
    pub async fn logout(&self, account_id: &AccountId) -> ServerResult<bool> {
        let existed = self.deps.session_repository.delete_by_account(account_id).await?;
        if existed {
            info!(account_id = %account_id, "account logged out");
        }
        Ok(existed)
    }

    /// 令牌换账号，只读
    pub async fn resolve_token(&self, token: &SessionToken) -> ServerResult<AccountId> {
        let now = self.deps.clock.now();
        match self.deps.session_repository.find_by_token(token).await? {
            Some(session) if !session.is_expired(now) => Ok(session.account_id),
            _ => Err(ServerError::from_code(ServerErrorCode::TokenInvalid)),
        }
    }

    pub async fn get_account(&self, account_id: &AccountId) -> ServerResult<Account> {
        self.deps
            .account_repository
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| no_such_user(account_id))
    }

    /// 只能修改自己的资料，空字段保持原值。
    pub async fn update_profile(
        &self,
        caller_id: &AccountId,
        account_id: &AccountId,
        update: ProfileUpdate,
    ) -> ServerResult<Account> {
        if caller_id != account_id {
            warn!(
                caller_id = %caller_id,
                account_id = %account_id,
                "profile update for another account"
            );
            return Err(no_such_user(account_id));
        }

        let now = self.deps.clock.now();
        match self
            .deps
            .account_repository
            .update_profile(account_id, &update, now)
            .await
        {
            Ok(account) => Ok(account),
            Err(RepositoryError::NotFound) => Err(no_such_user(account_id)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn sweep_expired_sessions(&self) -> ServerResult<u64> {
        let removed = self
            .deps
            .session_repository
            .delete_expired(self.deps.clock.now())
            .await?;
        if removed > 0 {
            info!(removed, "expired sessions removed");
        }
        Ok(removed)
    }

    pub async fn sweep_expired_codes(&self) -> ServerResult<u64> {
        let removed = self
            .deps
            .code_repository
            .delete_expired(self.deps.clock.now())
            .await?;
        if removed > 0 {
            info!(removed, "expired sms codes removed");
        }
        Ok(removed)
    }
}

fn no_such_user(account_id: &AccountId) -> ServerError {
    ServerError::new(
        ServerErrorCode::NoSuchUser,
        format!("no such user {}", account_id),
    )
}
