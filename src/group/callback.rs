// 成员入群前回调
// 在写入成员之前调用，回调可以改写昵称、头像、扩展字段与禁言时间；回调失败则整个操作失败。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{GroupMember, RoleLevel};
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait MemberJoinHook: Send + Sync {
    async fn before_member_join(
        &self,
        operation_id: &str,
        member: &mut GroupMember,
        group_ex: &str,
    ) -> AppResult<()>;
}

/// 未配置回调地址时使用
pub struct NoopJoinHook;

#[async_trait]
impl MemberJoinHook for NoopJoinHook {
    async fn before_member_join(
        &self,
        _operation_id: &str,
        _member: &mut GroupMember,
        _group_ex: &str,
    ) -> AppResult<()> {
        Ok(())
    }
}

const BEFORE_MEMBER_JOIN_COMMAND: &str = "callbackBeforeMemberJoinGroupCommand";

#[derive(Serialize)]
struct BeforeMemberJoinReq<'a> {
    callback_command: &'static str,
    operation_id: &'a str,
    group_id: &'a str,
    user_id: &'a str,
    ex: &'a str,
    group_ex: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BeforeMemberJoinResp {
    /// 非零表示拒绝入群
    err_code: i32,
    err_msg: String,
    nickname: Option<String>,
    face_url: Option<String>,
    role_level: Option<i32>,
    mute_end_time: Option<i64>,
    ex: Option<String>,
}

impl BeforeMemberJoinResp {
    fn apply(self, member: &mut GroupMember) {
        if let Some(nickname) = self.nickname {
            member.nickname = nickname;
        }
        if let Some(face_url) = self.face_url {
            member.face_url = face_url;
        }
        if let Some(ex) = self.ex {
            member.ex = ex;
        }
        if let Some(end) = self.mute_end_time.and_then(DateTime::<Utc>::from_timestamp_millis) {
            member.mute_end_time = end;
        }
        // 只允许降为普通成员，群主行不受影响
        if self.role_level == Some(RoleLevel::Ordinary.as_i32())
            && member.role_level != RoleLevel::Owner
        {
            member.role_level = RoleLevel::Ordinary;
        }
    }
}

/// 通过 HTTP 调用业务方的入群前回调
pub struct WebhookJoinHook {
    client: reqwest::Client,
    url: String,
}

impl WebhookJoinHook {
    pub fn new(url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MemberJoinHook for WebhookJoinHook {
    async fn before_member_join(
        &self,
        operation_id: &str,
        member: &mut GroupMember,
        group_ex: &str,
    ) -> AppResult<()> {
        let request = BeforeMemberJoinReq {
            callback_command: BEFORE_MEMBER_JOIN_COMMAND,
            operation_id,
            group_id: &member.group_id,
            user_id: &member.user_id,
            ex: &member.ex,
            group_ex,
        };
        let response = self.client.post(&self.url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(AppError::internal(format!(
                "before member join callback returned http {}",
                response.status()
            )));
        }
        let body: BeforeMemberJoinResp = response.json().await?;
        if body.err_code != 0 {
            tracing::warn!(
                "入群回调拒绝 group={} user={}: {}",
                member.group_id,
                member.user_id,
                body.err_msg
            );
            return Err(AppError::permission(format!(
                "rejected by callback: {}",
                body.err_msg
            )));
        }
        body.apply(member);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_but_never_touch_owner_role() {
        let mut owner = GroupMember::new("g1", "a", RoleLevel::Owner, "a");
        let resp = BeforeMemberJoinResp {
            nickname: Some("boss".into()),
            role_level: Some(RoleLevel::Ordinary.as_i32()),
            ..Default::default()
        };
        resp.apply(&mut owner);
        assert_eq!(owner.nickname, "boss");
        assert_eq!(owner.role_level, RoleLevel::Owner);

        let mut admin = GroupMember::new("g1", "b", RoleLevel::Admin, "a");
        let resp = BeforeMemberJoinResp {
            role_level: Some(RoleLevel::Owner.as_i32()),
            ..Default::default()
        };
        resp.apply(&mut admin);
        assert_eq!(admin.role_level, RoleLevel::Admin);
    }
}
