// 群组服务
// 持有存储、用户资料、入群回调与通知队列；各操作分别实现在 lifecycle、sync、query 中。

use std::collections::HashMap;
use std::sync::Arc;

use super::auth::Actor;
use super::callback::MemberJoinHook;
use super::model::{Group, RoleLevel};
use super::notification::{NotificationEvent, NotificationSender};
use crate::clients::{UserProfile, UserProfileProvider};
use crate::context::RequestContext;
use crate::database::GroupStore;
use crate::error::{AppError, AppResult};

/// 同步查询的上限
#[derive(Debug, Clone, Copy)]
pub struct SyncLimits {
    /// 单个范围的最大变更数，超出则全量
    pub sync_limit: usize,
    /// 批量增量同步的总变更数上限
    pub batch_ceiling: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            sync_limit: 1000,
            batch_ceiling: 500,
        }
    }
}

pub struct GroupService {
    pub(crate) store: Arc<dyn GroupStore>,
    pub(crate) users: Arc<dyn UserProfileProvider>,
    pub(crate) hook: Arc<dyn MemberJoinHook>,
    pub(crate) notifier: Arc<NotificationSender>,
    pub(crate) limits: SyncLimits,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn GroupStore>,
        users: Arc<dyn UserProfileProvider>,
        hook: Arc<dyn MemberJoinHook>,
        notifier: Arc<NotificationSender>,
        limits: SyncLimits,
    ) -> Self {
        Self {
            store,
            users,
            hook,
            notifier,
            limits,
        }
    }

    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    /// 等待通知队列处理完毕
    pub async fn shutdown(&self) {
        self.notifier.shutdown().await;
    }

    /// 读取未解散的群
    pub(crate) async fn load_active_group(&self, group_id: &str) -> AppResult<Group> {
        if group_id.is_empty() {
            return Err(AppError::args("group_id is required"));
        }
        let group = self.store.take_group(group_id).await?;
        if group.is_dismissed() {
            return Err(AppError::dismissed(group_id));
        }
        Ok(group)
    }

    /// 操作人在群内的角色，不是成员时为 None
    pub(crate) async fn role_of(&self, group_id: &str, user_id: &str) -> AppResult<Option<RoleLevel>> {
        match self.store.take_group_member(group_id, user_id).await {
            Ok(member) => Ok(Some(member.role_level)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn actor<'a>(ctx: &'a RequestContext, role: Option<RoleLevel>) -> Actor<'a> {
        Actor {
            user_id: &ctx.op_user_id,
            role,
            is_app_admin: ctx.is_app_admin,
        }
    }

    /// 批量获取用户资料，任何一个ID查不到都视为失败
    pub(crate) async fn resolve_users(
        &self,
        user_ids: &[String],
    ) -> AppResult<HashMap<String, UserProfile>> {
        let profiles = self.users.get_users_info_map(user_ids).await?;
        let missing: Vec<&str> = user_ids
            .iter()
            .filter(|id| !profiles.contains_key(id.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(AppError::not_found(format!(
                "users not found: {}",
                missing.join(",")
            )));
        }
        Ok(profiles)
    }

    /// 只能查看自己的数据，平台管理员除外
    pub(crate) fn check_self_or_admin(ctx: &RequestContext, user_id: &str) -> AppResult<()> {
        if ctx.is_self(user_id) || ctx.is_app_admin {
            Ok(())
        } else {
            Err(AppError::permission(format!(
                "{} cannot access data of {}",
                ctx.op_user_id, user_id
            )))
        }
    }

    pub(crate) fn notify(&self, event: NotificationEvent) {
        self.notifier.notify(event);
    }
}
