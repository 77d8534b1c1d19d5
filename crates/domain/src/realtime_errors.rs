//! 实时信令通道的数字错误码
//!
//! 与 HTTP 错误码独立，每个错误码对应固定的描述。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ServerErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum WsErrorCode {
    Ok,
    UnknownMessage,
    TokenInvalid,
    NoPermission,
    RoomNoExist,
    RoomInPk,
    RoomNotInPk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown realtime error code {0}")]
pub struct UnknownWsErrorCode(pub u32);

impl WsErrorCode {
    pub const ALL: [WsErrorCode; 7] = [
        WsErrorCode::Ok,
        WsErrorCode::UnknownMessage,
        WsErrorCode::TokenInvalid,
        WsErrorCode::NoPermission,
        WsErrorCode::RoomNoExist,
        WsErrorCode::RoomInPk,
        WsErrorCode::RoomNotInPk,
    ];

    pub fn code(self) -> u32 {
        match self {
            WsErrorCode::Ok => 0,
            WsErrorCode::UnknownMessage => 10001,
            WsErrorCode::TokenInvalid => 10002,
            WsErrorCode::NoPermission => 10003,
            WsErrorCode::RoomNoExist => 10011,
            WsErrorCode::RoomInPk => 10012,
            WsErrorCode::RoomNotInPk => 10013,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            WsErrorCode::Ok => "",
            WsErrorCode::UnknownMessage => "unknown message",
            WsErrorCode::TokenInvalid => "token invalid",
            WsErrorCode::NoPermission => "no permission",
            WsErrorCode::RoomNoExist => "room no exist",
            WsErrorCode::RoomInPk => "room in PK",
            WsErrorCode::RoomNotInPk => "room not in PK",
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|candidate| candidate.code() == code)
    }

    /// 只有部分服务错误在实时通道上有对应错误码
    pub fn from_server_code(code: ServerErrorCode) -> Option<Self> {
        match code {
            ServerErrorCode::TokenInvalid => Some(WsErrorCode::TokenInvalid),
            ServerErrorCode::NoPermission => Some(WsErrorCode::NoPermission),
            ServerErrorCode::RoomNoExist => Some(WsErrorCode::RoomNoExist),
            ServerErrorCode::RoomInPk => Some(WsErrorCode::RoomInPk),
            ServerErrorCode::RoomNotInPk => Some(WsErrorCode::RoomNotInPk),
            _ => None,
        }
    }
}

impl From<WsErrorCode> for u32 {
    fn from(value: WsErrorCode) -> Self {
        value.code()
    }
}

impl TryFrom<u32> for WsErrorCode {
    type Error = UnknownWsErrorCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_code(value).ok_or(UnknownWsErrorCode(value))
    }
}

/// 实时通道上的错误消息体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsError {
    pub code: WsErrorCode,
    pub error: String,
}

impl From<WsErrorCode> for WsError {
    fn from(code: WsErrorCode) -> Self {
        Self {
            code,
            error: code.description().to_owned(),
        }
    }
}
