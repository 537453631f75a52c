// 同步查询
// 客户端先用指纹判断是否有变化，再按版本日志拉取增量；检查点失效或变更过多时退化为全量。

use std::collections::{HashMap, HashSet};

use super::fingerprint::{id_hash, member_hash};
use super::service::GroupService;
use super::types::{
    BatchGetIncrementalGroupMemberReq, BatchIncrementalGroupMemberResp, FullIdsResp,
    GetFullGroupMemberUserIdsReq, GetFullJoinGroupIdsReq, GetIncrementalGroupMemberReq,
    GetIncrementalJoinGroupReq, GroupInfo, IncrementalResp, MemberInfo,
};
use super::version::{LogDelta, VersionHeader, VersionLog};
use super::view;
use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::utils::has_duplicate;

impl GroupService {
    pub async fn get_full_group_member_user_ids(
        &self,
        _ctx: &RequestContext,
        req: GetFullGroupMemberUserIdsReq,
    ) -> AppResult<FullIdsResp> {
        if req.group_id.is_empty() {
            return Err(AppError::args("group_id is required"));
        }
        self.store.take_group(&req.group_id).await?;
        // 先读版本再读ID，返回的版本不会超前于ID列表
        let header = self.store.find_max_member_version(&req.group_id).await?;
        let ids = self.store.find_member_user_ids(&req.group_id).await?;
        Ok(full_ids(header, ids, req.id_hash))
    }

    pub async fn get_full_join_group_ids(
        &self,
        ctx: &RequestContext,
        req: GetFullJoinGroupIdsReq,
    ) -> AppResult<FullIdsResp> {
        let user_id = target_user(ctx, &req.user_id);
        Self::check_self_or_admin(ctx, user_id)?;
        let header = self.store.find_max_join_version(user_id).await?;
        let ids = self.store.find_joined_group_ids(user_id).await?;
        Ok(full_ids(header, ids, req.id_hash))
    }

    pub async fn get_incremental_group_member(
        &self,
        _ctx: &RequestContext,
        req: GetIncrementalGroupMemberReq,
    ) -> AppResult<IncrementalResp<MemberInfo>> {
        if req.group_id.is_empty() {
            return Err(AppError::args("group_id is required"));
        }
        let header = self.store.find_max_member_version(&req.group_id).await?;
        if req.version != 0 && header.is_current(&req.version_id, req.version) {
            return Ok(unchanged(header));
        }
        let log = self
            .store
            .find_member_incr_version(&req.group_id, req.version, self.limits.sync_limit)
            .await?;
        self.member_response(&req, log).await
    }

    /// 批量增量同步，总变更数达到上限后其余群不出现在结果中
    pub async fn batch_get_incremental_group_member(
        &self,
        _ctx: &RequestContext,
        req: BatchGetIncrementalGroupMemberReq,
    ) -> AppResult<BatchIncrementalGroupMemberResp> {
        if req.req_list.is_empty() {
            return Err(AppError::args("req_list is empty"));
        }
        let group_ids: Vec<&str> = req.req_list.iter().map(|r| r.group_id.as_str()).collect();
        if group_ids.iter().any(|id| id.is_empty()) || has_duplicate(&group_ids) {
            return Err(AppError::args("group ids must be present and distinct"));
        }

        let scopes: Vec<(String, u64)> = req
            .req_list
            .iter()
            .map(|r| (r.group_id.clone(), r.version))
            .collect();
        let mut logs = self
            .store
            .batch_find_member_incr_version(&scopes, self.limits.sync_limit)
            .await?;

        let mut resp_list = HashMap::new();
        let mut total = 0usize;
        for item in &req.req_list {
            let Some(log) = logs.remove(&item.group_id) else {
                return Err(AppError::internal(format!(
                    "missing version log of group {}",
                    item.group_id
                )));
            };
            let resp = if item.version != 0 && log.header.is_current(&item.version_id, item.version) {
                unchanged(log.header)
            } else {
                self.member_response(item, log).await?
            };
            // 超出上限的群（包括第一个）留给客户端单独或下一批同步
            if total + resp.changed() > self.limits.batch_ceiling {
                tracing::debug!(
                    "batch sync ceiling reached at group {}, {} groups returned",
                    item.group_id,
                    resp_list.len()
                );
                break;
            }
            total += resp.changed();
            resp_list.insert(item.group_id.clone(), resp);
        }
        Ok(BatchIncrementalGroupMemberResp { resp_list })
    }

    pub async fn get_incremental_join_group(
        &self,
        ctx: &RequestContext,
        req: GetIncrementalJoinGroupReq,
    ) -> AppResult<IncrementalResp<GroupInfo>> {
        let user_id = target_user(ctx, &req.user_id);
        Self::check_self_or_admin(ctx, user_id)?;

        let header = self.store.find_max_join_version(user_id).await?;
        if req.version != 0 && header.is_current(&req.version_id, req.version) {
            return Ok(unchanged(header));
        }
        let log = self
            .store
            .find_join_incr_version(user_id, req.version, self.limits.sync_limit)
            .await?;

        if needs_full(&log, &req.version_id, req.version) {
            let group_ids = self.store.find_joined_group_ids(user_id).await?;
            let groups = self.store.find_groups(&group_ids).await?;
            let insert = view::group_infos(self.store.as_ref(), &groups).await?;
            return Ok(full_snapshot(log.header, insert, None));
        }

        let delta = log.changes_since(req.version);
        let changed: Vec<String> = delta.insert.iter().chain(&delta.update).cloned().collect();
        let groups = self.store.find_groups(&changed).await?;
        let infos = view::group_infos(self.store.as_ref(), &groups).await?;
        let by_id: HashMap<String, GroupInfo> = infos
            .into_iter()
            .map(|info| (info.group_id.clone(), info))
            .collect();
        Ok(resolve_delta(log.header, delta, by_id, None))
    }

    /// 当前成员列表的指纹，与增量回放后的客户端状态对比
    pub async fn member_fingerprint(&self, group_id: &str) -> AppResult<u64> {
        let members = self.store.find_group_members(group_id, None).await?;
        let infos = view::member_infos(self.users.as_ref(), &members).await?;
        Ok(member_hash(&infos))
    }

    async fn member_response(
        &self,
        req: &GetIncrementalGroupMemberReq,
        log: VersionLog,
    ) -> AppResult<IncrementalResp<MemberInfo>> {
        if needs_full(&log, &req.version_id, req.version) {
            let members = self.store.find_group_members(&req.group_id, None).await?;
            let insert = view::member_infos(self.users.as_ref(), &members).await?;
            let group = self.group_snapshot(&req.group_id).await?;
            return Ok(full_snapshot(log.header, insert, group));
        }

        let delta = log.changes_since(req.version);
        let group = if delta.has_group_update {
            self.group_snapshot(&req.group_id).await?
        } else {
            None
        };
        let changed: Vec<String> = delta.insert.iter().chain(&delta.update).cloned().collect();
        let by_id: HashMap<String, MemberInfo> = if changed.is_empty() {
            HashMap::new()
        } else {
            let members = self
                .store
                .find_group_members(&req.group_id, Some(&changed))
                .await?;
            view::member_infos(self.users.as_ref(), &members)
                .await?
                .into_iter()
                .map(|info| (info.user_id.clone(), info))
                .collect()
        };
        Ok(resolve_delta(log.header, delta, by_id, group))
    }

    async fn group_snapshot(&self, group_id: &str) -> AppResult<Option<GroupInfo>> {
        match self.store.take_group(group_id).await {
            Ok(group) => Ok(Some(view::group_info(self.store.as_ref(), &group).await?)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn target_user<'a>(ctx: &'a RequestContext, user_id: &'a str) -> &'a str {
    if user_id.is_empty() {
        &ctx.op_user_id
    } else {
        user_id
    }
}

fn full_ids(header: VersionHeader, ids: Vec<String>, known_hash: u64) -> FullIdsResp {
    let hash = id_hash(&ids);
    let equal = hash == known_hash;
    FullIdsResp {
        id_hash: hash,
        version_id: header.version_id,
        version: header.version,
        equal,
        ids: if equal { Vec::new() } else { ids },
    }
}

fn needs_full(log: &VersionLog, known_version_id: &str, known_version: u64) -> bool {
    log.header.requires_full_sync(known_version_id, known_version) || log.truncated()
}

fn unchanged<T>(header: VersionHeader) -> IncrementalResp<T> {
    IncrementalResp {
        version_id: header.version_id,
        version: header.version,
        full: false,
        delete: Vec::new(),
        insert: Vec::new(),
        update: Vec::new(),
        group: None,
        sort_version: 0,
    }
}

fn full_snapshot<T>(header: VersionHeader, insert: Vec<T>, group: Option<GroupInfo>) -> IncrementalResp<T> {
    IncrementalResp {
        full: true,
        insert,
        group,
        ..unchanged(header)
    }
}

/// 按当前存储状态解析日志中的ID，已不存在的元素改记为删除
fn resolve_delta<T>(
    header: VersionHeader,
    delta: LogDelta,
    mut rows: HashMap<String, T>,
    group: Option<GroupInfo>,
) -> IncrementalResp<T> {
    let mut delete = delta.delete;
    let mut take = |ids: Vec<String>| -> Vec<T> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            match rows.remove(&id) {
                Some(row) => found.push(row),
                None => delete.push(id),
            }
        }
        found
    };
    let insert = take(delta.insert);
    let update = take(delta.update);

    let mut seen = HashSet::new();
    delete.retain(|id| seen.insert(id.clone()));

    IncrementalResp {
        version_id: header.version_id,
        version: header.version,
        full: false,
        delete,
        insert,
        update,
        group,
        sort_version: delta.sort_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::version::{LogChange, VersionLogTable};

    #[test]
    fn equal_hash_omits_ids() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let hash = id_hash(&ids);
        let resp = full_ids(VersionHeader::fresh(), ids.clone(), hash);
        assert!(resp.equal);
        assert!(resp.ids.is_empty());

        let resp = full_ids(VersionHeader::fresh(), ids.clone(), 0);
        assert!(!resp.equal);
        assert_eq!(resp.ids, ids);
    }

    #[test]
    fn vanished_rows_become_deletes() {
        let mut table = VersionLogTable::new();
        table.append(&[LogChange::insert("a")], 100);
        let known = table.header().version;
        table.append(&[LogChange::insert("b"), LogChange::update("a")], 100);

        let log = table.since(known, 100);
        let delta = log.changes_since(known);
        let rows: HashMap<String, String> = [("b".to_string(), "b".to_string())].into();
        let resp = resolve_delta(log.header, delta, rows, None);
        assert_eq!(resp.insert, vec!["b".to_string()]);
        assert!(resp.update.is_empty());
        assert_eq!(resp.delete, vec!["a".to_string()]);
    }
}
