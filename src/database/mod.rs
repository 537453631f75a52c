// 数据库模块
// GroupStore 是群组存储的抽象契约：每个写方法是一个原子单元，
// 行变更与版本日志追加在同一事务内完成。

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::group::model::{
    Group, GroupMember, GroupRequest, GroupUpdate, HandleResult, MemberUpdate, RoleLevel,
};
use crate::group::version::{VersionHeader, VersionLog};

pub use memory::MemoryGroupStore;
pub use postgres::PgGroupStore;

/// 入群申请的处理结果
#[derive(Debug, Clone)]
pub struct RequestDecision {
    pub group_id: String,
    pub user_id: String,
    pub handle_result: HandleResult,
    pub handled_msg: String,
    pub handle_user_id: String,
    pub handled_time: DateTime<Utc>,
    /// 同意时一并写入的成员
    pub member: Option<GroupMember>,
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// 群不存在时返回 NotFound
    async fn take_group(&self, group_id: &str) -> AppResult<Group>;

    /// 忽略不存在的ID
    async fn find_groups(&self, group_ids: &[String]) -> AppResult<Vec<Group>>;

    /// 成员不存在时返回 NotFound
    async fn take_group_member(&self, group_id: &str, user_id: &str) -> AppResult<GroupMember>;

    /// user_ids 为 None 时返回全部成员，按 user_id 升序
    async fn find_group_members(
        &self,
        group_id: &str,
        user_ids: Option<&[String]>,
    ) -> AppResult<Vec<GroupMember>>;

    async fn find_group_member_role_levels(
        &self,
        group_id: &str,
        role_levels: &[RoleLevel],
    ) -> AppResult<Vec<GroupMember>>;

    /// 按 user_id 升序
    async fn find_member_user_ids(&self, group_id: &str) -> AppResult<Vec<String>>;

    /// 按 group_id 升序
    async fn find_joined_group_ids(&self, user_id: &str) -> AppResult<Vec<String>>;

    async fn count_group_members(&self, group_id: &str) -> AppResult<u64>;

    /// group 为 None 时只向已有群添加成员；成员已存在返回 Conflict
    async fn create_group(&self, group: Option<&Group>, members: &[GroupMember]) -> AppResult<()>;

    /// 修改群资料，群成员列表记一次群资料变化，每个成员的已加入列表记一次更新
    async fn update_group(&self, group_id: &str, update: &GroupUpdate) -> AppResult<()>;

    /// 标记为解散并移除全部成员，返回被移除的成员ID
    async fn dismiss_group(&self, group_id: &str) -> AppResult<Vec<String>>;

    async fn delete_group_members(&self, group_id: &str, user_ids: &[String]) -> AppResult<()>;

    /// 成员资料更新，角色变化时额外记录排序变化
    async fn update_group_members(&self, updates: &[MemberUpdate]) -> AppResult<()>;

    /// 新群主升为 Owner，旧群主降为 old_owner_role
    async fn transfer_group_owner(
        &self,
        group_id: &str,
        old_owner_user_id: &str,
        new_owner_user_id: &str,
        old_owner_role: RoleLevel,
    ) -> AppResult<()>;

    /// 每个 (group_id, user_id) 至多一条申请，新申请覆盖旧申请并重置为待处理
    async fn create_group_requests(&self, requests: &[GroupRequest]) -> AppResult<()>;

    async fn take_group_request(&self, group_id: &str, user_id: &str) -> AppResult<GroupRequest>;

    async fn find_group_requests(&self, group_id: &str) -> AppResult<Vec<GroupRequest>>;

    /// 仅当申请仍待处理时写入结果，否则返回 Args；同意时同一事务写入成员
    async fn handle_group_request(&self, decision: &RequestDecision) -> AppResult<()>;

    /// 群成员列表在 version 之后的日志，最多 limit 条
    async fn find_member_incr_version(
        &self,
        group_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog>;

    async fn batch_find_member_incr_version(
        &self,
        scopes: &[(String, u64)],
        limit: usize,
    ) -> AppResult<HashMap<String, VersionLog>> {
        let mut logs = HashMap::with_capacity(scopes.len());
        for (group_id, version) in scopes {
            let log = self.find_member_incr_version(group_id, *version, limit).await?;
            logs.insert(group_id.clone(), log);
        }
        Ok(logs)
    }

    /// 用户已加入群列表在 version 之后的日志
    async fn find_join_incr_version(
        &self,
        user_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog>;

    /// 日志头不存在时创建
    async fn find_max_member_version(&self, group_id: &str) -> AppResult<VersionHeader>;

    async fn find_max_join_version(&self, user_id: &str) -> AppResult<VersionHeader>;
}
