use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::common::ApiResponse;
use crate::utils::error_codes;

/// 群组服务的统一错误类型
///
/// 校验和权限错误在任何写操作之前返回；存储或外部服务失败统一归为 `Internal`。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 参数错误（缺失、格式错误、重复）
    #[error("invalid argument: {0}")]
    Args(String),
    /// 群组、成员或申请不存在
    #[error("not found: {0}")]
    NotFound(String),
    /// 权限状态机拒绝
    #[error("no permission: {0}")]
    Permission(String),
    /// 已是成员、群主唯一性等冲突
    #[error("conflict: {0}")]
    Conflict(String),
    /// 群组状态不允许（例如已解散）
    #[error("invalid state: {0}")]
    State(String),
    /// 存储或外部服务失败
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn args(msg: impl Into<String>) -> Self {
        AppError::Args(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        AppError::Permission(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        AppError::State(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// 群组已解散
    pub fn dismissed(group_id: &str) -> Self {
        AppError::State(format!("group {} is dismissed", group_id))
    }

    /// 对外返回的业务错误码
    pub fn code(&self) -> i32 {
        match self {
            AppError::Args(_) => error_codes::VALIDATION_ERROR,
            AppError::NotFound(_) => error_codes::NOT_FOUND,
            AppError::Permission(_) => error_codes::PERMISSION_DENIED,
            AppError::Conflict(_) => error_codes::CONFLICT,
            AppError::State(_) => error_codes::STATE_ERROR,
            AppError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// 业务错误走 200，内部错误走 500 以便 log_errors 中间件记录
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("record not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(format!("duplicate record: {}", db.message()))
            }
            other => AppError::Internal(format!("database: {}", other)),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Internal(format!("migration: {}", err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::Internal(format!("redis: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Internal(format!("rpc: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("serialization: {}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ApiResponse::<()> {
            code: self.code(),
            msg: self.to_string(),
            resp_data: None,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_http_ok() {
        assert_eq!(AppError::args("x").status(), StatusCode::OK);
        assert_eq!(AppError::permission("x").status(), StatusCode::OK);
        assert_eq!(
            AppError::internal("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AppError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(err.code(), error_codes::NOT_FOUND);
    }
}
