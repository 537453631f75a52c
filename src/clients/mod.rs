// 外部服务客户端
// 用户资料服务与消息服务，均为带超时的 JSON over HTTP 调用

pub mod msg;
pub mod user;

pub use msg::{HttpMessenger, Messenger, Notification, Recipient};
pub use user::{HttpUserClient, UserProfile, UserProfileProvider};

use serde::de::DeserializeOwned;

use crate::common::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::utils::error_codes;

/// 解析下游服务的统一响应，非零错误码视为内部错误
pub(crate) async fn read_envelope<T: DeserializeOwned>(
    service: &str,
    response: reqwest::Response,
) -> AppResult<Option<T>> {
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::internal(format!("{} returned http {}", service, status)));
    }
    let body: ApiResponse<T> = response.json().await?;
    if body.code != error_codes::SUCCESS {
        return Err(AppError::internal(format!(
            "{} returned code {}: {}",
            service, body.code, body.msg
        )));
    }
    Ok(body.resp_data)
}
