use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ServerError, ServerErrorCode};
use crate::value_objects::{AccountId, RoomId, Timestamp};

/// 直播间状态
///
/// Single → PkConnected → Single（对方关闭或结束 PK）
/// Single / PkConnected → Closed（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Single,
    /// 预留给两阶段邀请流程，当前配对一步完成
    PkInviting,
    PkConnected,
    Closed,
}

impl RoomStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Single => "single",
            RoomStatus::PkInviting => "pk_inviting",
            RoomStatus::PkConnected => "pk_connected",
            RoomStatus::Closed => "closed",
        }
    }

    pub fn is_open(self) -> bool {
        self != RoomStatus::Closed
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = ServerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "single" => Ok(RoomStatus::Single),
            "pk_inviting" => Ok(RoomStatus::PkInviting),
            "pk_connected" => Ok(RoomStatus::PkConnected),
            "closed" => Ok(RoomStatus::Closed),
            other => Err(ServerError::internal(format!("unknown room status {}", other))),
        }
    }
}

/// 直播间
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRoom {
    pub id: RoomId,
    pub name: String,
    pub creator: AccountId,
    pub play_url: String,
    pub rtc_room_id: String,
    pub status: RoomStatus,
    pub partner_room_id: Option<RoomId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl LiveRoom {
    /// 名称最大字节数
    pub const MAX_NAME_LEN: usize = 100;

    pub fn validate_name(name: &str) -> Result<(), ServerError> {
        if name.is_empty() || name.len() > Self::MAX_NAME_LEN {
            return Err(ServerError::new(
                ServerErrorCode::InvalidRoomName,
                format!("room name must be 1..={} bytes", Self::MAX_NAME_LEN),
            ));
        }
        Ok(())
    }

    /// 新建的房间处于 Single 状态，RTC 房间号与房间 ID 相同。
    pub fn open(
        id: RoomId,
        name: impl Into<String>,
        creator: AccountId,
        play_url: impl Into<String>,
        now: Timestamp,
    ) -> Result<Self, ServerError> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(Self {
            rtc_room_id: id.as_str().to_owned(),
            id,
            name,
            creator,
            play_url: play_url.into(),
            status: RoomStatus::Single,
            partner_room_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_owned_by(&self, account_id: &AccountId) -> bool {
        &self.creator == account_id
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_paired_with(&self, other: &RoomId) -> bool {
        self.status == RoomStatus::PkConnected && self.partner_room_id.as_ref() == Some(other)
    }

    /// 依赖配对状态的操作调用前检查
    pub fn ensure_in_pk(&self) -> Result<&RoomId, ServerError> {
        match (self.status, self.partner_room_id.as_ref()) {
            (RoomStatus::PkConnected, Some(partner)) => Ok(partner),
            _ => Err(ServerError::new(
                ServerErrorCode::RoomNotInPk,
                format!("room {} is {}", self.id, self.status),
            )),
        }
    }

    /// 只在 Single 状态下可以进入 PK，调用方负责对方房间同步变更。
    pub fn pair_with(&mut self, partner: RoomId, now: Timestamp) -> bool {
        if self.status != RoomStatus::Single {
            return false;
        }
        self.status = RoomStatus::PkConnected;
        self.partner_room_id = Some(partner);
        self.updated_at = now;
        true
    }

    pub fn unpair(&mut self, now: Timestamp) {
        if self.status == RoomStatus::PkConnected {
            self.status = RoomStatus::Single;
        }
        self.partner_room_id = None;
        self.updated_at = now;
    }

    /// 关闭房间，返回关闭前的配对房间
    pub fn close(&mut self, now: Timestamp) -> Option<RoomId> {
        let partner = self.partner_room_id.take();
        self.status = RoomStatus::Closed;
        self.updated_at = now;
        partner
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            creator: self.creator.clone(),
            play_url: self.play_url.clone(),
            rtc_room_id: self.rtc_room_id.clone(),
            status: self.status,
            partner_room_id: self.partner_room_id.clone(),
        }
    }
}

/// 对外返回的房间信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub creator: AccountId,
    pub play_url: String,
    pub rtc_room_id: String,
    pub status: RoomStatus,
    pub partner_room_id: Option<RoomId>,
}
