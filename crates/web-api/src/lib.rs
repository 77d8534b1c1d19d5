//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给账号服务和房间服务。

mod auth;
mod error;
mod extract;
mod routes;
mod state;

pub use auth::{extract_token, Anonymous, Authenticated, RequestId, REQUEST_ID_HEADER, TOKEN_COOKIE};
pub use error::{ApiError, ErrorBody, ServerResultExt};
pub use extract::{ApiJson, ApiQuery};
pub use routes::router;
pub use state::AppState;
