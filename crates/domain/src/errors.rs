//! 领域错误定义
//!
//! `ServerError` 是账号服务和房间服务对外返回的唯一错误类型。
//! 每个内部错误码都有固定的传输层状态码和对外提示信息。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 内部错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorCode {
    InvalidPhoneNumber,
    InvalidCode,
    InvalidRoomName,
    InvalidPkTarget,
    TooFrequent,
    TokenInvalid,
    AlreadyLoggedIn,
    NotLoggedIn,
    NoPermission,
    NoSuchUser,
    RoomNoExist,
    RoomNameUsed,
    RoomInPk,
    RoomNotInPk,
    TooManyRooms,
    SmsSendFailed,
    GenerationExhausted,
    Internal,
}

/// 错误分类，决定调用方是否可以重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 输入校验失败，不应重试
    Input,
    /// 需要重新登录
    Authentication,
    /// 不是资源所有者
    Authorization,
    /// 状态冲突，刷新状态或更换输入后再试
    StateConflict,
    /// 容量不足，稍后可重试
    Capacity,
    /// 未分类的内部错误
    Internal,
}

impl ServerErrorCode {
    pub const ALL: [ServerErrorCode; 18] = [
        ServerErrorCode::InvalidPhoneNumber,
        ServerErrorCode::InvalidCode,
        ServerErrorCode::InvalidRoomName,
        ServerErrorCode::InvalidPkTarget,
        ServerErrorCode::TooFrequent,
        ServerErrorCode::TokenInvalid,
        ServerErrorCode::AlreadyLoggedIn,
        ServerErrorCode::NotLoggedIn,
        ServerErrorCode::NoPermission,
        ServerErrorCode::NoSuchUser,
        ServerErrorCode::RoomNoExist,
        ServerErrorCode::RoomNameUsed,
        ServerErrorCode::RoomInPk,
        ServerErrorCode::RoomNotInPk,
        ServerErrorCode::TooManyRooms,
        ServerErrorCode::SmsSendFailed,
        ServerErrorCode::GenerationExhausted,
        ServerErrorCode::Internal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServerErrorCode::InvalidPhoneNumber => "invalid_phone_number",
            ServerErrorCode::InvalidCode => "invalid_code",
            ServerErrorCode::InvalidRoomName => "invalid_room_name",
            ServerErrorCode::InvalidPkTarget => "invalid_pk_target",
            ServerErrorCode::TooFrequent => "too_frequent",
            ServerErrorCode::TokenInvalid => "token_invalid",
            ServerErrorCode::AlreadyLoggedIn => "already_logged_in",
            ServerErrorCode::NotLoggedIn => "not_logged_in",
            ServerErrorCode::NoPermission => "no_permission",
            ServerErrorCode::NoSuchUser => "no_such_user",
            ServerErrorCode::RoomNoExist => "room_no_exist",
            ServerErrorCode::RoomNameUsed => "room_name_used",
            ServerErrorCode::RoomInPk => "room_in_pk",
            ServerErrorCode::RoomNotInPk => "room_not_in_pk",
            ServerErrorCode::TooManyRooms => "too_many_rooms",
            ServerErrorCode::SmsSendFailed => "sms_send_failed",
            ServerErrorCode::GenerationExhausted => "generation_exhausted",
            ServerErrorCode::Internal => "internal",
        }
    }

    pub fn class(self) -> ErrorClass {
        match self {
            ServerErrorCode::InvalidPhoneNumber
            | ServerErrorCode::InvalidCode
            | ServerErrorCode::InvalidRoomName
            | ServerErrorCode::InvalidPkTarget => ErrorClass::Input,
            ServerErrorCode::TokenInvalid
            | ServerErrorCode::AlreadyLoggedIn
            | ServerErrorCode::NotLoggedIn => ErrorClass::Authentication,
            ServerErrorCode::NoPermission => ErrorClass::Authorization,
            ServerErrorCode::NoSuchUser
            | ServerErrorCode::RoomNoExist
            | ServerErrorCode::RoomNameUsed
            | ServerErrorCode::RoomInPk
            | ServerErrorCode::RoomNotInPk => ErrorClass::StateConflict,
            ServerErrorCode::TooFrequent | ServerErrorCode::TooManyRooms => ErrorClass::Capacity,
            ServerErrorCode::SmsSendFailed
            | ServerErrorCode::GenerationExhausted
            | ServerErrorCode::Internal => ErrorClass::Internal,
        }
    }

    /// 传输层状态码
    pub fn http_status(self) -> u16 {
        match self {
            ServerErrorCode::InvalidPhoneNumber
            | ServerErrorCode::InvalidCode
            | ServerErrorCode::InvalidRoomName
            | ServerErrorCode::InvalidPkTarget => 400,
            ServerErrorCode::TokenInvalid
            | ServerErrorCode::AlreadyLoggedIn
            | ServerErrorCode::NotLoggedIn => 401,
            ServerErrorCode::NoPermission => 403,
            ServerErrorCode::NoSuchUser | ServerErrorCode::RoomNoExist => 404,
            ServerErrorCode::RoomNameUsed
            | ServerErrorCode::RoomInPk
            | ServerErrorCode::RoomNotInPk => 409,
            ServerErrorCode::TooFrequent => 429,
            ServerErrorCode::TooManyRooms => 503,
            ServerErrorCode::SmsSendFailed
            | ServerErrorCode::GenerationExhausted
            | ServerErrorCode::Internal => 500,
        }
    }

    /// 返回给调用方的提示信息，内部错误不暴露细节
    pub fn public_message(self) -> &'static str {
        match self {
            ServerErrorCode::InvalidPhoneNumber => "invalid phone number",
            ServerErrorCode::InvalidCode => "invalid sms code",
            ServerErrorCode::InvalidRoomName => "invalid room name",
            ServerErrorCode::InvalidPkTarget => "invalid pk target",
            ServerErrorCode::TooFrequent => "sms code sent too frequently",
            ServerErrorCode::TokenInvalid => "token invalid",
            ServerErrorCode::AlreadyLoggedIn => "user already logged in",
            ServerErrorCode::NotLoggedIn => "user not logged in",
            ServerErrorCode::NoPermission => "no permission",
            ServerErrorCode::NoSuchUser => "no such user",
            ServerErrorCode::RoomNoExist => "room does not exist",
            ServerErrorCode::RoomNameUsed => "room name already used",
            ServerErrorCode::RoomInPk => "room already in pk",
            ServerErrorCode::RoomNotInPk => "room not in pk",
            ServerErrorCode::TooManyRooms => "too many rooms",
            ServerErrorCode::SmsSendFailed
            | ServerErrorCode::GenerationExhausted
            | ServerErrorCode::Internal => "internal server error",
        }
    }

    pub fn is_internal(self) -> bool {
        self.class() == ErrorClass::Internal
    }

    pub fn is_retryable_later(self) -> bool {
        self.class() == ErrorClass::Capacity
    }
}

impl fmt::Display for ServerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 服务层错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ServerError {
    pub code: ServerErrorCode,
    pub message: String,
}

impl ServerError {
    pub fn new(code: ServerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 使用错误码默认提示信息
    pub fn from_code(code: ServerErrorCode) -> Self {
        Self::new(code, code.public_message())
    }

    /// 创建内部错误，message 只用于日志
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ServerErrorCode::Internal, message)
    }

    pub fn is(&self, code: ServerErrorCode) -> bool {
        self.code == code
    }
}

impl From<ServerErrorCode> for ServerError {
    fn from(code: ServerErrorCode) -> Self {
        Self::from_code(code)
    }
}

/// 服务层结果类型
pub type ServerResult<T> = Result<T, ServerError>;

/// 存储层唯一约束
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniqueKey {
    /// 主键
    Id,
    /// 账号手机号
    PhoneNumber,
    /// 会话令牌
    Token,
    /// 每个账号只能有一个有效会话
    ActiveSession,
    /// 未关闭房间的名称
    RoomName,
    /// 重发间隔内已有验证码
    RecentCode,
}

/// 存储层错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated: {0:?}")]
    Conflict(UniqueKey),
    #[error("record is not in the expected state")]
    StateMismatch,
    #[error("capacity exceeded")]
    CapacityExceeded,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 未被服务显式处理的存储错误一律视为内部错误
impl From<RepositoryError> for ServerError {
    fn from(err: RepositoryError) -> Self {
        ServerError::internal(err.to_string())
    }
}
