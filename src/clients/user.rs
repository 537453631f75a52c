use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::read_envelope;
use crate::error::AppResult;

/// 用户公开资料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub nickname: String,
    pub face_url: String,
    #[serde(default)]
    pub app_manager_level: i32,
}

#[async_trait]
pub trait UserProfileProvider: Send + Sync {
    /// 批量获取用户资料，不存在的用户不出现在结果中
    async fn get_users_info(&self, user_ids: &[String]) -> AppResult<Vec<UserProfile>>;

    async fn get_users_info_map(
        &self,
        user_ids: &[String],
    ) -> AppResult<HashMap<String, UserProfile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .get_users_info(user_ids)
            .await?
            .into_iter()
            .map(|profile| (profile.user_id.clone(), profile))
            .collect())
    }
}

#[derive(Serialize)]
struct GetUsersInfoReq<'a> {
    #[serde(rename = "userIDs")]
    user_ids: &'a [String],
}

#[derive(Deserialize, Default)]
struct GetUsersInfoResp {
    #[serde(default)]
    users_info: Vec<UserProfile>,
}

/// 用户服务的 HTTP 客户端
#[derive(Clone)]
pub struct HttpUserClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUserClient {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/user/get_users_info", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl UserProfileProvider for HttpUserClient {
    async fn get_users_info(&self, user_ids: &[String]) -> AppResult<Vec<UserProfile>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.endpoint)
            .json(&GetUsersInfoReq { user_ids })
            .send()
            .await?;
        let data: Option<GetUsersInfoResp> = read_envelope("user service", response).await?;
        Ok(data.unwrap_or_default().users_info)
    }
}
