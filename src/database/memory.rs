// 内存实现
// 整个存储由一把 tokio Mutex 保护，每个写方法在一次加锁内完成行变更与日志追加。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{GroupStore, RequestDecision};
use crate::error::{AppError, AppResult};
use crate::group::model::{
    Group, GroupMember, GroupRequest, GroupStatus, GroupUpdate, HandleResult, MemberUpdate,
    RoleLevel,
};
use crate::group::version::{LogChange, VersionHeader, VersionLog, VersionLogTable};

#[derive(Default)]
struct Inner {
    groups: HashMap<String, Group>,
    /// group_id -> user_id -> member
    members: HashMap<String, BTreeMap<String, GroupMember>>,
    requests: BTreeMap<(String, String), GroupRequest>,
    member_logs: HashMap<String, VersionLogTable>,
    join_logs: HashMap<String, VersionLogTable>,
}

impl Inner {
    fn group(&self, group_id: &str) -> AppResult<&Group> {
        self.groups
            .get(group_id)
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))
    }

    fn roster(&self, group_id: &str) -> impl Iterator<Item = &GroupMember> {
        self.members.get(group_id).into_iter().flat_map(|m| m.values())
    }

    fn member_ids(&self, group_id: &str) -> Vec<String> {
        self.roster(group_id).map(|m| m.user_id.clone()).collect()
    }

    fn append_member_log(&mut self, group_id: &str, changes: &[LogChange], retention: usize) {
        self.member_logs
            .entry(group_id.to_string())
            .or_default()
            .append(changes, retention);
    }

    fn append_join_log(&mut self, user_id: &str, change: LogChange, retention: usize) {
        self.join_logs
            .entry(user_id.to_string())
            .or_default()
            .append(&[change], retention);
    }

    fn insert_members(&mut self, members: &[GroupMember], retention: usize) -> AppResult<()> {
        for member in members {
            if self
                .members
                .get(&member.group_id)
                .is_some_and(|roster| roster.contains_key(&member.user_id))
            {
                return Err(AppError::conflict(format!(
                    "user {} is already in group {}",
                    member.user_id, member.group_id
                )));
            }
        }

        let mut per_group: BTreeMap<&str, Vec<LogChange>> = BTreeMap::new();
        for member in members {
            self.members
                .entry(member.group_id.clone())
                .or_default()
                .insert(member.user_id.clone(), member.clone());
            per_group
                .entry(member.group_id.as_str())
                .or_default()
                .push(LogChange::insert(&member.user_id));
        }
        for (group_id, changes) in per_group {
            self.append_member_log(group_id, &changes, retention);
        }
        for member in members {
            self.append_join_log(&member.user_id, LogChange::insert(&member.group_id), retention);
        }
        Ok(())
    }
}

/// 测试与嵌入场景使用的内存存储
pub struct MemoryGroupStore {
    inner: Mutex<Inner>,
    retention: usize,
}

impl MemoryGroupStore {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
        }
    }
}

impl Default for MemoryGroupStore {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn take_group(&self, group_id: &str) -> AppResult<Group> {
        self.inner.lock().await.group(group_id).cloned()
    }

    async fn find_groups(&self, group_ids: &[String]) -> AppResult<Vec<Group>> {
        let inner = self.inner.lock().await;
        Ok(group_ids
            .iter()
            .filter_map(|id| inner.groups.get(id).cloned())
            .collect())
    }

    async fn take_group_member(&self, group_id: &str, user_id: &str) -> AppResult<GroupMember> {
        let inner = self.inner.lock().await;
        inner
            .members
            .get(group_id)
            .and_then(|roster| roster.get(user_id))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("user {} not in group {}", user_id, group_id)))
    }

    async fn find_group_members(
        &self,
        group_id: &str,
        user_ids: Option<&[String]>,
    ) -> AppResult<Vec<GroupMember>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .roster(group_id)
            .filter(|member| user_ids.is_none_or(|ids| ids.contains(&member.user_id)))
            .cloned()
            .collect())
    }

    async fn find_group_member_role_levels(
        &self,
        group_id: &str,
        role_levels: &[RoleLevel],
    ) -> AppResult<Vec<GroupMember>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .roster(group_id)
            .filter(|member| role_levels.contains(&member.role_level))
            .cloned()
            .collect())
    }

    async fn find_member_user_ids(&self, group_id: &str) -> AppResult<Vec<String>> {
        Ok(self.inner.lock().await.member_ids(group_id))
    }

    async fn find_joined_group_ids(&self, user_id: &str) -> AppResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner
            .members
            .iter()
            .filter(|(_, roster)| roster.contains_key(user_id))
            .map(|(group_id, _)| group_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count_group_members(&self, group_id: &str) -> AppResult<u64> {
        Ok(self.inner.lock().await.roster(group_id).count() as u64)
    }

    async fn create_group(&self, group: Option<&Group>, members: &[GroupMember]) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        match group {
            Some(group) => {
                if inner.groups.contains_key(&group.group_id) {
                    return Err(AppError::conflict(format!("group {} exists", group.group_id)));
                }
                if members.iter().any(|member| member.group_id != group.group_id) {
                    return Err(AppError::args("member belongs to another group"));
                }
                inner.insert_members(members, self.retention)?;
                inner.groups.insert(group.group_id.clone(), group.clone());
            }
            None => {
                for member in members {
                    inner.group(&member.group_id)?;
                }
                inner.insert_members(members, self.retention)?;
            }
        }
        Ok(())
    }

    async fn update_group(&self, group_id: &str, update: &GroupUpdate) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;
        update.apply(group, now);

        inner.append_member_log(group_id, &[LogChange::group_metadata()], self.retention);
        for user_id in inner.member_ids(group_id) {
            inner.append_join_log(&user_id, LogChange::update(group_id), self.retention);
        }
        Ok(())
    }

    async fn dismiss_group(&self, group_id: &str) -> AppResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let group = inner
            .groups
            .get_mut(group_id)
            .ok_or_else(|| AppError::not_found(format!("group {}", group_id)))?;
        group.status = GroupStatus::Dismissed;

        let removed: Vec<String> = inner
            .members
            .remove(group_id)
            .map(|roster| roster.into_keys().collect())
            .unwrap_or_default();

        let mut changes = vec![LogChange::group_metadata()];
        changes.extend(removed.iter().map(|user_id| LogChange::delete(user_id)));
        inner.append_member_log(group_id, &changes, self.retention);
        for user_id in &removed {
            inner.append_join_log(user_id, LogChange::delete(group_id), self.retention);
        }
        Ok(removed)
    }

    async fn delete_group_members(&self, group_id: &str, user_ids: &[String]) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let mut removed = Vec::new();
        if let Some(roster) = inner.members.get_mut(group_id) {
            for user_id in user_ids {
                if roster.remove(user_id).is_some() {
                    removed.push(user_id.clone());
                }
            }
        }
        if removed.is_empty() {
            return Ok(());
        }
        let changes: Vec<LogChange> = removed.iter().map(|id| LogChange::delete(id)).collect();
        inner.append_member_log(group_id, &changes, self.retention);
        for user_id in &removed {
            inner.append_join_log(user_id, LogChange::delete(group_id), self.retention);
        }
        Ok(())
    }

    async fn update_group_members(&self, updates: &[MemberUpdate]) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        for update in updates {
            let exists = inner
                .members
                .get(&update.group_id)
                .is_some_and(|roster| roster.contains_key(&update.user_id));
            if !exists {
                return Err(AppError::not_found(format!(
                    "user {} not in group {}",
                    update.user_id, update.group_id
                )));
            }
        }

        let mut per_group: BTreeMap<String, Vec<LogChange>> = BTreeMap::new();
        for update in updates {
            if let Some(member) = inner
                .members
                .get_mut(&update.group_id)
                .and_then(|roster| roster.get_mut(&update.user_id))
            {
                update.apply(member);
            }
            let changes = per_group.entry(update.group_id.clone()).or_default();
            changes.push(LogChange::update(&update.user_id));
            if update.role_level.is_some() {
                changes.push(LogChange::sort_order());
            }
        }
        for (group_id, changes) in per_group {
            inner.append_member_log(&group_id, &changes, self.retention);
        }
        Ok(())
    }

    async fn transfer_group_owner(
        &self,
        group_id: &str,
        old_owner_user_id: &str,
        new_owner_user_id: &str,
        old_owner_role: RoleLevel,
    ) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let roster = inner
            .members
            .get_mut(group_id)
            .ok_or_else(|| AppError::not_found(format!("group {} has no members", group_id)))?;
        if !roster.contains_key(old_owner_user_id) || !roster.contains_key(new_owner_user_id) {
            return Err(AppError::not_found("owner transfer member missing"));
        }
        for (user_id, role) in [
            (old_owner_user_id, old_owner_role),
            (new_owner_user_id, RoleLevel::Owner),
        ] {
            if let Some(member) = roster.get_mut(user_id) {
                member.role_level = role;
            }
        }
        inner.append_member_log(
            group_id,
            &[
                LogChange::update(old_owner_user_id),
                LogChange::update(new_owner_user_id),
                LogChange::sort_order(),
            ],
            self.retention,
        );
        Ok(())
    }

    async fn create_group_requests(&self, requests: &[GroupRequest]) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        for request in requests {
            inner.requests.insert(
                (request.group_id.clone(), request.user_id.clone()),
                request.clone(),
            );
        }
        Ok(())
    }

    async fn take_group_request(&self, group_id: &str, user_id: &str) -> AppResult<GroupRequest> {
        let inner = self.inner.lock().await;
        inner
            .requests
            .get(&(group_id.to_string(), user_id.to_string()))
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("request of {} to group {}", user_id, group_id)))
    }

    async fn find_group_requests(&self, group_id: &str) -> AppResult<Vec<GroupRequest>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .requests
            .values()
            .filter(|request| request.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn handle_group_request(&self, decision: &RequestDecision) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (decision.group_id.clone(), decision.user_id.clone());
        match inner.requests.get(&key) {
            None => {
                return Err(AppError::not_found(format!(
                    "request of {} to group {}",
                    decision.user_id, decision.group_id
                )));
            }
            Some(request) if request.handle_result != HandleResult::Pending => {
                return Err(AppError::args("group request already processed"));
            }
            Some(_) => {}
        }

        if let Some(member) = &decision.member {
            inner.insert_members(std::slice::from_ref(member), self.retention)?;
        }
        if let Some(request) = inner.requests.get_mut(&key) {
            request.handle_result = decision.handle_result;
            request.handled_msg = decision.handled_msg.clone();
            request.handle_user_id = decision.handle_user_id.clone();
            request.handled_time = decision.handled_time;
        }
        Ok(())
    }

    async fn find_member_incr_version(
        &self,
        group_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .member_logs
            .entry(group_id.to_string())
            .or_default()
            .since(version, limit))
    }

    async fn find_join_incr_version(
        &self,
        user_id: &str,
        version: u64,
        limit: usize,
    ) -> AppResult<VersionLog> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .join_logs
            .entry(user_id.to_string())
            .or_default()
            .since(version, limit))
    }

    async fn find_max_member_version(&self, group_id: &str) -> AppResult<VersionHeader> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .member_logs
            .entry(group_id.to_string())
            .or_default()
            .header()
            .clone())
    }

    async fn find_max_join_version(&self, user_id: &str) -> AppResult<VersionHeader> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .join_logs
            .entry(user_id.to_string())
            .or_default()
            .header()
            .clone())
    }
}
