//! 直播 PK 系统核心领域模型
//!
//! 包含账号、会话、验证码、直播间等实体，错误分类表以及实时通道错误码。

pub mod entities;
pub mod errors;
pub mod realtime_errors;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use realtime_errors::*;
pub use value_objects::*;
