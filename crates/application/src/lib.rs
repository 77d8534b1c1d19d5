//! 应用层实现。
//!
//! 账号服务和房间服务围绕领域模型实现用例，
//! 存储、短信、时钟和随机数都通过 trait 注入，便于替换和测试。

pub mod clock;
pub mod context;
pub mod id_generator;
pub mod repository;
pub mod services;
pub mod sms;

pub use clock::{Clock, FixedClock, SystemClock};
pub use context::RequestContext;
pub use id_generator::{
    IdGenerator, RandomSource, SeededRandomSource, ThreadRandomSource, UniqueInsertError,
};
pub use repository::{
    AccountRepository, RoomRepository, SessionRepository, VerificationCodeRepository,
};
pub use services::{
    ensure_in_pk, AccountService, AccountServiceDependencies, AccountSettings, LoginOutcome,
    RoomService, RoomServiceDependencies, RoomSettings,
};
pub use sms::{SmsError, SmsGateway};
