use std::sync::Arc;

use domain::{
    AccountId, LiveRoom, RepositoryError, RoomId, RoomSummary, ServerError, ServerErrorCode,
    ServerResult, UniqueKey,
};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    id_generator::{IdGenerator, UniqueInsertError, ROOM_ID_LEN},
    repository::RoomRepository,
};

/// 推流地址与容量配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSettings {
    pub live_host: String,
    pub live_hub: String,
    pub max_rooms: u32,
}

impl RoomSettings {
    pub fn from_config(config: &config::AppConfig) -> Self {
        Self {
            live_host: config.live.host.clone(),
            live_hub: config.live.hub.clone(),
            max_rooms: config.rooms.max_rooms,
        }
    }

    pub fn play_url(&self, room_id: &str) -> String {
        format!("rtmp://{}/{}/{}", self.live_host, self.live_hub, room_id)
    }
}

pub struct RoomServiceDependencies {
    pub room_repository: Arc<dyn RoomRepository>,
    pub id_generator: Arc<IdGenerator>,
    pub clock: Arc<dyn Clock>,
    pub settings: RoomSettings,
}

pub struct RoomService {
    deps: RoomServiceDependencies,
}

impl RoomService {
    pub fn new(deps: RoomServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create_room(
        &self,
        creator_id: &AccountId,
        name: &str,
    ) -> ServerResult<RoomSummary> {
        LiveRoom::validate_name(name)?;
        let now = self.deps.clock.now();
        let max_rooms = self.deps.settings.max_rooms;

        let result = self
            .deps
            .id_generator
            .insert_unique(ROOM_ID_LEN, |id| {
                let play_url = self.deps.settings.play_url(&id);
                let room = LiveRoom::open(RoomId::new(id), name, creator_id.clone(), play_url, now);
                async move {
                    let room = room.map_err(|err| RepositoryError::storage(err.message))?;
                    self.deps.room_repository.insert_open(room, max_rooms).await
                }
            })
            .await;

        let room = match result {
            Ok(room) => room,
            Err(UniqueInsertError::Repository(RepositoryError::Conflict(UniqueKey::RoomName))) => {
                return Err(ServerError::new(
                    ServerErrorCode::RoomNameUsed,
                    format!("room name {} already used", name),
                ));
            }
            Err(UniqueInsertError::Repository(RepositoryError::CapacityExceeded)) => {
                warn!(max_rooms, "room capacity reached");
                return Err(ServerError::new(
                    ServerErrorCode::TooManyRooms,
                    format!("at most {} open rooms", max_rooms),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        info!(room_id = %room.id, creator_id = %creator_id, name = %room.name, "room created");
        Ok(room.summary())
    }

    pub async fn get_room(&self, room_id: &RoomId) -> ServerResult<RoomSummary> {
        Ok(self.find_open(room_id).await?.summary())
    }

    /// 所有未关闭的房间
    pub async fn list_rooms(&self) -> ServerResult<Vec<RoomSummary>> {
        let rooms = self.deps.room_repository.list_open().await?;
        Ok(rooms.iter().map(LiveRoom::summary).collect())
    }

    /// 可以发起 PK 的房间：Single 状态且不是自己创建的
    pub async fn list_pk_candidates(
        &self,
        caller_id: &AccountId,
    ) -> ServerResult<Vec<RoomSummary>> {
        let rooms = self.deps.room_repository.list_single_excluding(caller_id).await?;
        Ok(rooms.iter().map(LiveRoom::summary).collect())
    }

    /// 发起 PK，两个房间在同一个原子操作中进入 PkConnected。
    pub async fn request_pk(
        &self,
        caller_id: &AccountId,
        caller_room_id: &RoomId,
        target_room_id: &RoomId,
    ) -> ServerResult<RoomSummary> {
        if caller_room_id == target_room_id {
            return Err(ServerError::new(
                ServerErrorCode::InvalidPkTarget,
                format!("room {} cannot pk with itself", caller_room_id),
            ));
        }

        let caller_room = self.find_open(caller_room_id).await?;
        ensure_owner(&caller_room, caller_id)?;

        let now = self.deps.clock.now();
        match self
            .deps
            .room_repository
            .pair(caller_room_id, target_room_id, now)
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::NotFound) => {
                return Err(ServerError::new(
                    ServerErrorCode::RoomNoExist,
                    format!("room {} or {} does not exist", caller_room_id, target_room_id),
                ));
            }
            Err(RepositoryError::StateMismatch) => {
                return Err(ServerError::new(
                    ServerErrorCode::RoomInPk,
                    format!("room {} or {} is not single", caller_room_id, target_room_id),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        info!(room_id = %caller_room_id, partner_room_id = %target_room_id, "rooms paired");
        self.get_room(caller_room_id).await
    }

    /// 结束 PK，双方回到 Single。
    pub async fn end_pk(
        &self,
        caller_id: &AccountId,
        room_id: &RoomId,
    ) -> ServerResult<RoomSummary> {
        let room = self.find_open(room_id).await?;
        ensure_owner(&room, caller_id)?;
        let partner_id = ensure_in_pk(&room)?.clone();

        let now = self.deps.clock.now();
        match self.deps.room_repository.unpair(room_id, &partner_id, now).await {
            Ok(()) => {}
            Err(RepositoryError::NotFound | RepositoryError::StateMismatch) => {
                return Err(ServerError::new(
                    ServerErrorCode::RoomNotInPk,
                    format!("room {} is no longer paired with {}", room_id, partner_id),
                ));
            }
            Err(err) => return Err(err.into()),
        }

        info!(room_id = %room_id, partner_room_id = %partner_id, "pk ended");
        self.get_room(room_id).await
    }

    /// 关闭房间，处于 PK 中的对方房间同时回到 Single。
    pub async fn close_room(
        &self,
        caller_id: &AccountId,
        room_id: &RoomId,
    ) -> ServerResult<RoomSummary> {
        // 创建者不会变化
        let room = self.find_open(room_id).await?;
        ensure_owner(&room, caller_id)?;

        let now = self.deps.clock.now();
        let closed = match self.deps.room_repository.close(room_id, now).await {
            Ok(room) => room,
            Err(RepositoryError::NotFound) => return Err(room_no_exist(room_id)),
            Err(RepositoryError::StateMismatch) => {
                warn!(room_id = %room_id, "room pairing kept changing during close");
                return Err(ServerError::new(
                    ServerErrorCode::RoomInPk,
                    format!("pairing of room {} changed while closing", room_id),
                ));
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            room_id = %room_id,
            creator_id = %caller_id,
            partner_room_id = ?room.partner_room_id,
            "room closed"
        );
        Ok(closed.summary())
    }

    async fn find_open(&self, room_id: &RoomId) -> ServerResult<LiveRoom> {
        match self.deps.room_repository.find_by_id(room_id).await? {
            Some(room) if room.is_open() => Ok(room),
            _ => Err(room_no_exist(room_id)),
        }
    }
}

/// 依赖配对状态的操作前调用，不在 PK 中返回 `RoomNotInPk`。
pub fn ensure_in_pk(room: &LiveRoom) -> ServerResult<&RoomId> {
    room.ensure_in_pk()
}

fn ensure_owner(room: &LiveRoom, caller_id: &AccountId) -> ServerResult<()> {
    if !room.is_owned_by(caller_id) {
        warn!(room_id = %room.id, caller_id = %caller_id, "caller does not own room");
        return Err(ServerError::new(
            ServerErrorCode::NoPermission,
            format!("account {} does not own room {}", caller_id, room.id),
        ));
    }
    Ok(())
}

fn room_no_exist(room_id: &RoomId) -> ServerError {
    ServerError::new(
        ServerErrorCode::RoomNoExist,
        format!("room {} does not exist", room_id),
    )
}
