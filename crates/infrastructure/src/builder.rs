use std::sync::Arc;

use application::{
    AccountRepository, RoomRepository, SessionRepository, SmsGateway, VerificationCodeRepository,
};
use config::{AppConfig, StorageBackend};
use thiserror::Error;
use tracing::info;

use crate::{
    memory::MemoryStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
    sms::LogSmsGateway,
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 服务层需要的全部适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub account_repository: Arc<dyn AccountRepository>,
    pub session_repository: Arc<dyn SessionRepository>,
    pub code_repository: Arc<dyn VerificationCodeRepository>,
    pub room_repository: Arc<dyn RoomRepository>,
    pub sms_gateway: Arc<dyn SmsGateway>,
}

impl Infrastructure {
    /// 所有仓储共享同一个内存存储
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            account_repository: store.clone(),
            session_repository: store.clone(),
            code_repository: store.clone(),
            room_repository: store,
            sms_gateway: Arc::new(LogSmsGateway),
        }
    }

    pub async fn connect_postgres(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, InfrastructureError> {
        let pool = create_pg_pool(database_url, max_connections).await?;
        MIGRATOR.run(&pool).await?;

        let storage = PgStorage::new(pool);
        Ok(Self {
            account_repository: storage.account_repository,
            session_repository: storage.session_repository,
            code_repository: storage.code_repository,
            room_repository: storage.room_repository,
            sms_gateway: Arc::new(LogSmsGateway),
        })
    }

    /// 按配置选择存储后端
    pub async fn from_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        match config.storage.backend {
            StorageBackend::Memory => {
                info!("using in-memory storage");
                Ok(Self::in_memory())
            }
            StorageBackend::Postgres => {
                info!("using postgres storage");
                Self::connect_postgres(&config.database.url, config.database.max_connections).await
            }
        }
    }
}
