//! 基础设施层实现。
//!
//! 提供内存存储、PostgreSQL 仓储和短信通道等适配器，实现应用层定义的接口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;
pub mod sms;

pub use builder::{Infrastructure, InfrastructureError};
pub use memory::MemoryStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgAccountRepository, PgRoomRepository, PgSessionRepository, PgStorage,
    PgVerificationCodeRepository,
};
pub use sms::LogSmsGateway;
