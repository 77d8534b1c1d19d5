use std::sync::Arc;

use application::{AccountRepository, RoomRepository, SessionRepository, VerificationCodeRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domain::{
    Account, AccountId, ActiveSession, LiveRoom, PhoneNumber, ProfileUpdate, RepositoryError,
    RoomId, RoomStatus, SessionToken, Timestamp, UniqueKey, VerificationCode,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, warn};

/// 容量检查使用的事务级咨询锁
const ROOM_CAPACITY_LOCK: i64 = 0x6c69_7665_706b;
/// 关闭房间时配对关系被并发修改的重试次数
const CLOSE_LOCK_ATTEMPTS: usize = 3;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

/// 把唯一约束冲突翻译成对应的键，约束名见 migrations
fn map_write_err(err: sqlx::Error) -> RepositoryError {
    let key = err
        .as_database_error()
        .filter(|db_err| db_err.is_unique_violation())
        .and_then(|db_err| match db_err.constraint() {
            Some("accounts_pkey" | "live_rooms_pkey") => Some(UniqueKey::Id),
            Some("accounts_phone_number_key") => Some(UniqueKey::PhoneNumber),
            Some("sessions_pkey") => Some(UniqueKey::ActiveSession),
            Some("sessions_token_key") => Some(UniqueKey::Token),
            Some("live_rooms_open_name_idx") => Some(UniqueKey::RoomName),
            Some("verification_codes_pkey") => Some(UniqueKey::RecentCode),
            _ => None,
        });
    match key {
        Some(key) => RepositoryError::Conflict(key),
        None => map_sqlx_err(err),
    }
}

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: String,
    phone_number: String,
    nickname: String,
    gender: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = RepositoryError;

    fn try_from(value: AccountRecord) -> Result<Self, Self::Error> {
        let phone_number =
            PhoneNumber::parse(value.phone_number).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Account {
            id: AccountId::new(value.id),
            phone_number,
            nickname: value.nickname,
            gender: value.gender,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRecord {
    account_id: String,
    token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<SessionRecord> for ActiveSession {
    fn from(value: SessionRecord) -> Self {
        ActiveSession {
            account_id: AccountId::new(value.account_id),
            token: SessionToken::new(value.token),
            issued_at: value.issued_at,
            expires_at: value.expires_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: String,
    name: String,
    creator_id: String,
    play_url: String,
    rtc_room_id: String,
    status: String,
    partner_room_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoomRecord> for LiveRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let status: RoomStatus = value
            .status
            .parse()
            .map_err(|err: domain::ServerError| invalid_data(err.message))?;
        Ok(LiveRoom {
            id: RoomId::new(value.id),
            name: value.name,
            creator: AccountId::new(value.creator_id),
            play_url: value.play_url,
            rtc_room_id: value.rtc_room_id,
            status,
            partner_room_id: value.partner_room_id.map(RoomId::new),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, phone_number, nickname, gender, created_at, updated_at";
const ROOM_COLUMNS: &str =
    "id, name, creator_id, play_url, rtc_room_id, status, partner_room_id, created_at, updated_at";

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn insert_if_absent(&self, account: Account) -> Result<Account, RepositoryError> {
        let inserted = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            INSERT INTO accounts (id, phone_number, nickname, gender, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (phone_number) DO NOTHING
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id.as_str())
        .bind(account.phone_number.as_str())
        .bind(&account.nickname)
        .bind(&account.gender)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_err)?;

        if let Some(record) = inserted {
            return Account::try_from(record);
        }

        // 手机号已被并发请求注册，返回胜出的账号
        self.find_by_phone(&account.phone_number)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Account::try_from).transpose()
    }

    async fn find_by_phone(
        &self,
        phone_number: &PhoneNumber,
    ) -> Result<Option<Account>, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE phone_number = $1"
        ))
        .bind(phone_number.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Account::try_from).transpose()
    }

    async fn update_profile(
        &self,
        id: &AccountId,
        update: &ProfileUpdate,
        now: Timestamp,
    ) -> Result<Account, RepositoryError> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            r#"
            UPDATE accounts
            SET nickname = COALESCE($2, nickname), gender = COALESCE($3, gender), updated_at = $4
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id.as_str())
        .bind(update.nickname())
        .bind(update.gender())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Account::try_from).transpose()?.ok_or(RepositoryError::NotFound)
    }
}

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create_exclusive(
        &self,
        session: ActiveSession,
        now: Timestamp,
    ) -> Result<ActiveSession, RepositoryError> {
        // 只有已过期的旧会话会被覆盖
        let written = sqlx::query_as::<_, SessionRecord>(
            r#"
            INSERT INTO sessions (account_id, token, issued_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id) DO UPDATE
            SET token = EXCLUDED.token,
                issued_at = EXCLUDED.issued_at,
                expires_at = EXCLUDED.expires_at
            WHERE sessions.expires_at <= $5
            RETURNING account_id, token, issued_at, expires_at
            "#,
        )
        .bind(session.account_id.as_str())
        .bind(session.token.as_str())
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_err)?;

        written
            .map(ActiveSession::from)
            .ok_or(RepositoryError::Conflict(UniqueKey::ActiveSession))
    }

    async fn find_by_token(
        &self,
        token: &SessionToken,
    ) -> Result<Option<ActiveSession>, RepositoryError> {
        let record = sqlx::query_as::<_, SessionRecord>(
            "SELECT account_id, token, issued_at, expires_at FROM sessions WHERE token = $1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(ActiveSession::from))
    }

    async fn delete_by_account(&self, account_id: &AccountId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE account_id = $1")
            .bind(account_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgVerificationCodeRepository {
    pool: PgPool,
}

impl PgVerificationCodeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationCodeRepository for PgVerificationCodeRepository {
    async fn store_if_resend_allowed(
        &self,
        code: VerificationCode,
        min_interval: Duration,
    ) -> Result<(), RepositoryError> {
        let resend_after = code.sent_at - min_interval;
        let written = sqlx::query(
            r#"
            INSERT INTO verification_codes (phone_number, code, sent_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (phone_number) DO UPDATE
            SET code = EXCLUDED.code, sent_at = EXCLUDED.sent_at, expires_at = EXCLUDED.expires_at
            WHERE verification_codes.sent_at <= $5
            "#,
        )
        .bind(code.phone_number.as_str())
        .bind(&code.code)
        .bind(code.sent_at)
        .bind(code.expires_at)
        .bind(resend_after)
        .execute(&self.pool)
        .await
        .map_err(map_write_err)?;

        if written.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(UniqueKey::RecentCode));
        }
        Ok(())
    }

    async fn consume(
        &self,
        phone_number: &PhoneNumber,
        code: &str,
        now: Timestamp,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM verification_codes
            WHERE phone_number = $1 AND code = $2 AND expires_at > $3
            "#,
        )
        .bind(phone_number.as_str())
        .bind(code)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn discard(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM verification_codes WHERE phone_number = $1 AND code = $2")
            .bind(phone_number.as_str())
            .bind(code)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn delete_expired(&self, now: Timestamp) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM verification_codes WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按 ID 顺序锁住房间，避免两个事务交叉加锁
    async fn lock_rooms(
        tx: &mut Transaction<'_, Postgres>,
        ids: &[&RoomId],
    ) -> Result<Vec<LiveRoom>, RepositoryError> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_owned()).collect();
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM live_rooms WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        ))
        .bind(ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(LiveRoom::try_from).collect()
    }
}

fn open_room<'a>(rooms: &'a [LiveRoom], id: &RoomId) -> Result<&'a LiveRoom, RepositoryError> {
    rooms
        .iter()
        .find(|room| &room.id == id && room.is_open())
        .ok_or(RepositoryError::NotFound)
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn insert_open(
        &self,
        room: LiveRoom,
        max_open: u32,
    ) -> Result<LiveRoom, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ROOM_CAPACITY_LOCK)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let open: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM live_rooms WHERE status <> 'closed'")
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        if open >= i64::from(max_open) {
            return Err(RepositoryError::CapacityExceeded);
        }

        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            INSERT INTO live_rooms
                (id, name, creator_id, play_url, rtc_room_id, status, partner_room_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ROOM_COLUMNS}
            "#
        ))
        .bind(room.id.as_str())
        .bind(&room.name)
        .bind(room.creator.as_str())
        .bind(&room.play_url)
        .bind(&room.rtc_room_id)
        .bind(room.status.as_str())
        .bind(room.partner_room_id.as_ref().map(RoomId::as_str))
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_write_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        LiveRoom::try_from(record)
    }

    async fn find_by_id(&self, id: &RoomId) -> Result<Option<LiveRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM live_rooms WHERE id = $1"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(LiveRoom::try_from).transpose()
    }

    async fn list_open(&self) -> Result<Vec<LiveRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            "SELECT {ROOM_COLUMNS} FROM live_rooms WHERE status <> 'closed' ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(LiveRoom::try_from).collect()
    }

    async fn list_single_excluding(
        &self,
        creator: &AccountId,
    ) -> Result<Vec<LiveRoom>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomRecord>(&format!(
            r#"
            SELECT {ROOM_COLUMNS} FROM live_rooms
            WHERE status = 'single' AND creator_id <> $1
            ORDER BY created_at, id
            "#
        ))
        .bind(creator.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(LiveRoom::try_from).collect()
    }

    async fn pair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError> {
        if a == b {
            return Err(RepositoryError::StateMismatch);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let rooms = Self::lock_rooms(&mut tx, &[a, b]).await?;

        let a_status = open_room(&rooms, a)?.status;
        let b_status = open_room(&rooms, b)?.status;
        if a_status != RoomStatus::Single || b_status != RoomStatus::Single {
            return Err(RepositoryError::StateMismatch);
        }

        let updated = sqlx::query(
            r#"
            UPDATE live_rooms
            SET status = 'pk_connected',
                partner_room_id = CASE WHEN id = $1 THEN $2 ELSE $1 END,
                updated_at = $3
            WHERE id IN ($1, $2) AND status = 'single'
            "#,
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if updated.rows_affected() != 2 {
            return Err(RepositoryError::StateMismatch);
        }
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn unpair(&self, a: &RoomId, b: &RoomId, now: Timestamp) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let rooms = Self::lock_rooms(&mut tx, &[a, b]).await?;

        let (room_a, room_b) = (open_room(&rooms, a)?, open_room(&rooms, b)?);
        let mutual = room_a.is_paired_with(b) && room_b.is_paired_with(a);
        if !mutual {
            return Err(RepositoryError::StateMismatch);
        }

        sqlx::query(
            r#"
            UPDATE live_rooms
            SET status = 'single', partner_room_id = NULL, updated_at = $3
            WHERE id IN ($1, $2)
            "#,
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn close(&self, id: &RoomId, now: Timestamp) -> Result<LiveRoom, RepositoryError> {
        for attempt in 1..=CLOSE_LOCK_ATTEMPTS {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

            // 先读出当前配对房间，再按 ID 顺序同时锁住两边
            let snapshot = sqlx::query_as::<_, RoomRecord>(&format!(
                "SELECT {ROOM_COLUMNS} FROM live_rooms WHERE id = $1"
            ))
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?
            .map(LiveRoom::try_from)
            .transpose()?
            .filter(LiveRoom::is_open)
            .ok_or(RepositoryError::NotFound)?;

            let partner = snapshot.partner_room_id;
            let locked = match &partner {
                Some(partner_id) => Self::lock_rooms(&mut tx, &[id, partner_id]).await?,
                None => Self::lock_rooms(&mut tx, &[id]).await?,
            };

            let room = open_room(&locked, id)?;
            if room.partner_room_id != partner {
                debug!(room_id = %id, attempt, "pairing changed while locking, retrying close");
                continue;
            }

            let record = sqlx::query_as::<_, RoomRecord>(&format!(
                r#"
                UPDATE live_rooms
                SET status = 'closed', partner_room_id = NULL, updated_at = $2
                WHERE id = $1
                RETURNING {ROOM_COLUMNS}
                "#
            ))
            .bind(id.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

            if let Some(partner_id) = &partner {
                sqlx::query(
                    r#"
                    UPDATE live_rooms
                    SET status = 'single', partner_room_id = NULL, updated_at = $3
                    WHERE id = $1 AND partner_room_id = $2 AND status = 'pk_connected'
                    "#,
                )
                .bind(partner_id.as_str())
                .bind(id.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }

            tx.commit().await.map_err(map_sqlx_err)?;
            return LiveRoom::try_from(record);
        }

        warn!(room_id = %id, "close gave up after repeated pairing changes");
        Err(RepositoryError::StateMismatch)
    }
}

pub struct PgStorage {
    pub pool: PgPool,
    pub account_repository: Arc<PgAccountRepository>,
    pub session_repository: Arc<PgSessionRepository>,
    pub code_repository: Arc<PgVerificationCodeRepository>,
    pub room_repository: Arc<PgRoomRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            account_repository: Arc::new(PgAccountRepository::new(pool.clone())),
            session_repository: Arc::new(PgSessionRepository::new(pool.clone())),
            code_repository: Arc::new(PgVerificationCodeRepository::new(pool.clone())),
            room_repository: Arc::new(PgRoomRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
