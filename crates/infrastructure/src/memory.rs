//! 进程内存储
//!
//! 所有集合放在同一把异步锁后面，每个条件操作在一次加锁内完成，
//! 与数据库实现提供相同的原子性保证。适用于单实例部署和测试。

use std::collections::HashMap;

use application::{AccountRepository, RoomRepository, SessionRepository, VerificationCodeRepository};
use async_trait::async_trait;
use chrono::Duration;
use domain::{
    Account, AccountId, ActiveSession, LiveRoom, PhoneNumber, ProfileUpdate, RepositoryError,
    RoomId, RoomStatus, SessionToken, Timestamp, UniqueKey, VerificationCode,
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    accounts_by_phone: HashMap<PhoneNumber, AccountId>,
    sessions: HashMap<AccountId, ActiveSession>,
    sessions_by_token: HashMap<SessionToken, AccountId>,
    codes: HashMap<PhoneNumber, VerificationCode>,
    rooms: HashMap<RoomId, LiveRoom>,
    /// 未关闭房间的名称索引
    open_room_names: HashMap<String, RoomId>,
}

impl State {
    fn open_room(&self, id: &RoomId) -> Result<&LiveRoom, RepositoryError> {
        self.rooms
            .get(id)
            .filter(|room| room.is_open())
            .ok_or(RepositoryError::NotFound)
    }

    fn room_mut(&mut self, id: &RoomId) -> Result<&mut LiveRoom, RepositoryError> {
        self.rooms.get_mut(id).ok_or(RepositoryError::NotFound)
    }

    fn sorted_rooms<'a>(&'a self, filter: impl Fn(&LiveRoom) -> bool) -> Vec<LiveRoom> {
        let mut rooms: Vec<&'a LiveRoom> =
            self.rooms.values().filter(|room| filter(room)).collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rooms.into_iter().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn insert_if_absent(&self, account: Account) -> Result<Account, RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing_id) = state.accounts_by_phone.get(&account.phone_number) {
            return state
                .accounts
                .get(existing_id)
                .cloned()
                .ok_or_else(|| RepositoryError::storage("phone index points to missing account"));
        }
        if state.accounts.contains_key(&account.id) {
            return Err(RepositoryError::Conflict(UniqueKey::Id));
        }

        state
            .accounts_by_phone
            .insert(account.phone_number.clone(), account.id.clone());
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError> {
        Ok(self.state.lock().await.accounts.get(id).cloned())
    }

    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<Account>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .accounts_by_phone
            .get(phone_number)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: &ProfileUpdate,
        now: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let mut state = self.state.lock().await;
        let account = state.accounts.get_mut(id).ok_or(RepositoryError::NotFound)?;
        account.apply_profile(update, now);
        Ok(account.clone())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create_exclusive(
        &self,
        session: ActiveSession,
        now: Timestamp,
    ) -> Result<ActiveSession, RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.sessions.get(&session.account_id) {
            if !existing.is_expired(now) {
                return Err(RepositoryError::Conflict(UniqueKey::ActiveSession));
            }
        }
        if state.sessions_by_token.contains_key(&session.token) {
            return Err(RepositoryError::Conflict(UniqueKey::Token));
        }

        if let Some(expired) = state.sessions.remove(&session.account_id) {
            state.sessions_by_token.remove(&expired.token);
        }
        state
            .sessions_by_token
            .insert(session.token.clone(), session.account_id.clone());
        state
            .sessions
            .insert(session.account_id.clone(), session.clone());
        Ok(session)
    }

    async fn find_by_token(
        &self,
        token: &SessionToken,
    ) -> Result<Option<ActiveSession>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions_by_token
            .get(token)
            .and_then(|account_id| state.sessions.get(account_id))
            .cloned())
    }

    async fn delete_by_account(&self, account_id: &AccountId) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.sessions.remove(account_id) {
            Some(session) => {
                state.sessions_by_token.remove(&session.token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        let expired: Vec<ActiveSession> = state
            .sessions
            .values()
            .filter(|session| session.is_expired(now))
            .cloned()
            .collect();
        for session in &expired {
            state.sessions.remove(&session.account_id);
            state.sessions_by_token.remove(&session.token);
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl VerificationCodeRepository for MemoryStore {
    async fn store_if_resend_allowed(
        &self,
        code: VerificationCode,
        min_interval: Duration,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.codes.get(&code.phone_number) {
            if !existing.resend_allowed(code.sent_at, min_interval) {
                return Err(RepositoryError::Conflict(UniqueKey::RecentCode));
            }
        }
        state.codes.insert(code.phone_number.clone(), code);
        Ok(())
    }

    async fn consume(
        &self,
        phone_number: &PhoneNumber,
        code: &str,
        now: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let accepted = state
            .codes
            .get(phone_number)
            .is_some_and(|stored| stored.accepts(code, now));
        if accepted {
            state.codes.remove(phone_number);
        }
        Ok(accepted)
    }

    async fn discard(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        if state
            .codes
            .get(phone_number)
            .is_some_and(|stored| stored.code == code)
        {
            state.codes.remove(phone_number);
        }
        Ok(())
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError> {
        let mut state = self.state.lock().await;
        let before = state.codes.len();
        state.codes.retain(|_, code| !code.is_expired(now));
        Ok((before - state.codes.len()) as u64)
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn insert_open(
        &self,
        room: LiveRoom,
        max_open: u32,
    ) -> Result<LiveRoom, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict(UniqueKey::Id));
        }
        if state.open_room_names.contains_key(&room.name) {
            return Err(RepositoryError::Conflict(UniqueKey::RoomName));
        }
        if state.open_room_names.len() >= max_open as usize {
            return Err(RepositoryError::CapacityExceeded);
        }

        state.open_room_names.insert(room.name.clone(), room.id.clone());
        state.rooms.insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<LiveRoom>, RepositoryError> {
        Ok(self.state.lock().await.rooms.get(id).cloned())
    }

    async fn list_open(&self) -> Result<Vec<LiveRoom>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.sorted_rooms(LiveRoom::is_open))
    }

    async fn list_single_excluding(
        &self,
        creator: &AccountId,
    ) -> Result<Vec<LiveRoom>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state.sorted_rooms(|room| {
            room.status == RoomStatus::Single && !room.is_owned_by(creator)
        }))
    }

    async fn pair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let a_status = state.open_room(a)?.status;
        let b_status = state.open_room(b)?.status;
        if a == b || a_status != RoomStatus::Single || b_status != RoomStatus::Single {
            return Err(RepositoryError::StateMismatch);
        }

        state.room_mut(a)?.pair_with(b.clone(), now);
        state.room_mut(b)?.pair_with(a.clone(), now);
        Ok(())
    }

    async fn unpair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let mutual = state.open_room(a)?.is_paired_with(b) && state.open_room(b)?.is_paired_with(a);
        if !mutual {
            return Err(RepositoryError::StateMismatch);
        }

        state.room_mut(a)?.unpair(now);
        state.room_mut(b)?.unpair(now);
        Ok(())
    }

    async fn close(&self, id: &RoomId, now: Timestamp) -> Result<LiveRoom, RepositoryError> {
        let mut state = self.state.lock().await;
        state.open_room(id)?;

        let room = state.room_mut(id)?;
        let partner = room.close(now);
        let closed = room.clone();
        state.open_room_names.remove(&closed.name);

        if let Some(partner_id) = partner {
            if let Ok(partner_room) = state.room_mut(&partner_id) {
                if partner_room.is_paired_with(id) {
                    partner_room.unpair(now);
                    debug!(
                        room_id = %id,
                        partner_room_id = %partner_id,
                        "partner room reverted to single"
                    );
                }
            }
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn room(id: &str, name: &str, creator: &str) -> LiveRoom {
        LiveRoom::open(
            RoomId::new(id),
            name,
            AccountId::new(creator),
            format!("rtmp://live/hub/{}", id),
            Utc::now(),
        )
        .unwrap()
    }

    fn session(account: &str, token: &str, now: Timestamp, ttl: Duration) -> ActiveSession {
        ActiveSession::issue(AccountId::new(account), SessionToken::new(token), now, ttl)
    }

    #[tokio::test]
    async fn test_closed_room_releases_name() {
        let store = MemoryStore::new();
        store.insert_open(room("r1", "alice_stream", "alice"), 10).await.unwrap();

        let err = store
            .insert_open(room("r2", "alice_stream", "alice"), 10)
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::Conflict(UniqueKey::RoomName));

        store.close(&RoomId::new("r1"), Utc::now()).await.unwrap();
        store.insert_open(room("r2", "alice_stream", "alice"), 10).await.unwrap();
    }

    #[tokio::test]
    async fn test_capacity_counts_open_rooms_only() {
        let store = MemoryStore::new();
        store.insert_open(room("r1", "one", "alice"), 1).await.unwrap();
        assert_eq!(
            store.insert_open(room("r2", "two", "bob"), 1).await.unwrap_err(),
            RepositoryError::CapacityExceeded
        );

        store.close(&RoomId::new("r1"), Utc::now()).await.unwrap();
        store.insert_open(room("r2", "two", "bob"), 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_room_id() {
        let store = MemoryStore::new();
        store.insert_open(room("r1", "one", "alice"), 10).await.unwrap();
        assert_eq!(
            store.insert_open(room("r1", "two", "bob"), 10).await.unwrap_err(),
            RepositoryError::Conflict(UniqueKey::Id)
        );
    }

    #[tokio::test]
    async fn test_pair_requires_both_single() {
        let store = MemoryStore::new();
        for (id, creator) in [("a", "alice"), ("b", "bob"), ("c", "carol")] {
            store.insert_open(room(id, id, creator), 10).await.unwrap();
        }
        let (a, b, c) = (RoomId::new("a"), RoomId::new("b"), RoomId::new("c"));

        store.pair(&a, &b, Utc::now()).await.unwrap();
        assert_eq!(
            store.pair(&c, &b, Utc::now()).await.unwrap_err(),
            RepositoryError::StateMismatch
        );
        assert_eq!(
            store.pair(&c, &RoomId::new("zzz"), Utc::now()).await.unwrap_err(),
            RepositoryError::NotFound
        );

        let c_room = RoomRepository::find_by_id(&store, &c).await.unwrap().unwrap();
        assert_eq!(c_room.status, RoomStatus::Single);
    }

    #[tokio::test]
    async fn test_pair_with_missing_target_while_paired() {
        let store = MemoryStore::new();
        for (id, creator) in [("a", "alice"), ("b", "bob")] {
            store.insert_open(room(id, id, creator), 10).await.unwrap();
        }
        let (a, b) = (RoomId::new("a"), RoomId::new("b"));
        store.pair(&a, &b, Utc::now()).await.unwrap();

        assert_eq!(
            store.pair(&a, &RoomId::new("zzz"), Utc::now()).await.unwrap_err(),
            RepositoryError::NotFound
        );
        store.close(&b, Utc::now()).await.unwrap();
        assert_eq!(
            store.pair(&RoomId::new("zzz"), &a, Utc::now()).await.unwrap_err(),
            RepositoryError::NotFound
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_replaced() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let old = session("acc", "old", now, Duration::seconds(10));
        store.create_exclusive(old, now).await.unwrap();

        let fresh = session("acc", "new", now, Duration::seconds(10));
        assert_eq!(
            store.create_exclusive(fresh.clone(), now).await.unwrap_err(),
            RepositoryError::Conflict(UniqueKey::ActiveSession)
        );

        let later = now + Duration::seconds(11);
        store.create_exclusive(fresh, later).await.unwrap();
        assert!(store.find_by_token(&SessionToken::new("old")).await.unwrap().is_none());
        assert!(store.find_by_token(&SessionToken::new("new")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .create_exclusive(session("a", "same", now, Duration::hours(1)), now)
            .await
            .unwrap();
        assert_eq!(
            store
                .create_exclusive(session("b", "same", now, Duration::hours(1)), now)
                .await
                .unwrap_err(),
            RepositoryError::Conflict(UniqueKey::Token)
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let phone = PhoneNumber::parse("13800000001").unwrap();

        store
            .create_exclusive(session("a", "t1", now, Duration::seconds(5)), now)
            .await
            .unwrap();
        store
            .create_exclusive(session("b", "t2", now, Duration::hours(1)), now)
            .await
            .unwrap();
        store
            .store_if_resend_allowed(
                VerificationCode::issue(phone, "123456".to_string(), now, Duration::seconds(5)),
                Duration::seconds(1),
            )
            .await
            .unwrap();

        let later = now + Duration::seconds(6);
        assert_eq!(SessionRepository::delete_expired(&store, later).await.unwrap(), 1);
        assert_eq!(VerificationCodeRepository::delete_expired(&store, later).await.unwrap(), 1);
        assert!(store.find_by_token(&SessionToken::new("t2")).await.unwrap().is_some());
    }
}
