//! 领域实体定义
//!
//! 包含账号、会话、短信验证码和直播间。

pub mod account;
pub mod live_room;
pub mod session;
pub mod verification_code;

pub use account::{Account, AccountSummary, ProfileUpdate};
pub use live_room::{LiveRoom, RoomStatus, RoomSummary};
pub use session::ActiveSession;
pub use verification_code::VerificationCode;
