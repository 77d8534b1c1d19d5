//! 存储层抽象
//!
//! 所有唯一性和配对约束都由实现方以原子的条件操作保证，
//! 服务层不会先读后写来维护这些约束。

use async_trait::async_trait;
use chrono::Duration;
use domain::{
    Account, AccountId, ActiveSession, LiveRoom, PhoneNumber, ProfileUpdate, RepositoryError,
    RoomId, SessionToken, Timestamp, VerificationCode,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// 按手机号插入账号；手机号已注册时返回已有账号。
    ///
    /// 主键冲突返回 `Conflict(UniqueKey::Id)`。
    async fn insert_if_absent(&self, account: Account) -> Result<Account, RepositoryError>;
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError>;
    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<Account>, RepositoryError>;
    /// 账号不存在时返回 `NotFound`
    async fn update_profile(
        &self,
        id: &AccountId,
        update: &ProfileUpdate,
        now: Timestamp,
    ) -> Result<Account, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// 账号没有未过期会话时写入，过期的旧会话被替换。
    ///
    /// 已有有效会话返回 `Conflict(UniqueKey::ActiveSession)`，
    /// 令牌重复返回 `Conflict(UniqueKey::Token)`。
    async fn create_exclusive(
        &self,
        session: ActiveSession,
        now: Timestamp,
    ) -> Result<ActiveSession, RepositoryError>;
    async fn find_by_token(
        &self,
        token: &SessionToken,
    ) -> Result<Option<ActiveSession>, RepositoryError>;
    /// 返回是否删除了会话
    async fn delete_by_account(&self, account_id: &AccountId) -> Result<bool, RepositoryError>;
    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    /// 同一手机号在 `min_interval` 内已发送过验证码时返回
    /// `Conflict(UniqueKey::RecentCode)`，否则覆盖旧验证码。
    async fn store_if_resend_allowed(
        &self,
        code: VerificationCode,
        min_interval: Duration,
    ) -> Result<(), RepositoryError>;
    /// 匹配且未过期时删除并返回 true
    async fn consume(
        &self,
        phone_number: &PhoneNumber,
        code: &str,
        now: Timestamp,
    ) -> Result<bool, RepositoryError>;
    /// 只删除仍是该值的验证码
    async fn discard(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), RepositoryError>;
    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRepository: Send + Sync {
    /// 插入新房间。
    ///
    /// - `Conflict(UniqueKey::Id)`：房间 ID 重复
    /// - `Conflict(UniqueKey::RoomName)`：未关闭房间中已有同名
    /// - `CapacityExceeded`：未关闭房间数已达 `max_open`
    async fn insert_open(&self, room: LiveRoom, max_open: u32) -> Result<LiveRoom, RepositoryError>;
    async fn find_by_id(&self, id: &RoomId) -> Result<Option<LiveRoom>, RepositoryError>;
    /// 所有未关闭房间
    async fn list_open(&self) -> Result<Vec<LiveRoom>, RepositoryError>;
    /// Single 状态且不属于 `creator` 的房间
    async fn list_single_excluding(
        &self,
        creator: &AccountId,
    ) -> Result<Vec<LiveRoom>, RepositoryError>;
    /// 两个房间同时从 Single 进入 PkConnected 并互相引用。
    ///
    /// 任一房间不存在或已关闭返回 `NotFound`，优先于状态检查。
    /// 两个房间都存在但任一不是 Single 返回 `StateMismatch`。
    async fn pair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError>;
    /// 两个互相配对的房间同时回到 Single，否则返回 `StateMismatch`
    async fn unpair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError>;
    /// 关闭房间，对方房间同时回到 Single。返回关闭后的房间。
    ///
    /// 房间不存在或已关闭返回 `NotFound`，配对关系反复变化无法完成时返回 `StateMismatch`。
    async fn close(&self, id: &RoomId, now: Timestamp) -> Result<LiveRoom, RepositoryError>;
}
