use application::RequestContext;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{ServerError, ServerResult};
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                request_id: request_id.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message, request_id)
    }

    /// 按错误分类表生成响应，内部错误只记录日志不暴露细节
    pub fn from_server(err: ServerError, request_id: &str) -> Self {
        let code = err.code;
        let status = StatusCode::from_u16(code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if code.is_internal() {
            error!(request_id, code = %code, detail = %err.message, "request failed");
        } else {
            warn!(request_id, code = %code, detail = %err.message, "request rejected");
        }

        Self::new(status, code.as_str(), code.public_message(), request_id)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// 把服务层结果转换成带请求 ID 的响应错误
pub trait ServerResultExt<T> {
    fn or_api(self, context: &RequestContext) -> Result<T, ApiError>;
}

impl<T> ServerResultExt<T> for ServerResult<T> {
    fn or_api(self, context: &RequestContext) -> Result<T, ApiError> {
        self.map_err(|err| ApiError::from_server(err, &context.request_id))
    }
}
