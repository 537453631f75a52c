// 群组查询

use super::auth::{Operation, authorize};
use super::service::GroupService;
use super::types::{
    GetGroupMembersInfoReq, GetGroupsInfoReq, GetJoinedGroupListReq, GroupIdReq, GroupInfo,
    GroupRequestInfo, MemberInfo,
};
use super::view;
use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::utils::distinct;

impl GroupService {
    pub async fn get_groups_info(
        &self,
        _ctx: &RequestContext,
        req: GetGroupsInfoReq,
    ) -> AppResult<Vec<GroupInfo>> {
        if req.group_ids.is_empty() {
            return Err(AppError::args("group_ids is empty"));
        }
        let groups = self.store.find_groups(&distinct(req.group_ids)).await?;
        view::group_infos(self.store.as_ref(), &groups).await
    }

    /// user_ids 为空时返回全部成员
    pub async fn get_group_members_info(
        &self,
        _ctx: &RequestContext,
        req: GetGroupMembersInfoReq,
    ) -> AppResult<Vec<MemberInfo>> {
        if req.group_id.is_empty() {
            return Err(AppError::args("group_id is required"));
        }
        let user_ids = distinct(req.user_ids);
        let filter = (!user_ids.is_empty()).then_some(user_ids.as_slice());
        let members = self.store.find_group_members(&req.group_id, filter).await?;
        view::member_infos(self.users.as_ref(), &members).await
    }

    pub async fn get_group_application_list(
        &self,
        ctx: &RequestContext,
        req: GroupIdReq,
    ) -> AppResult<Vec<GroupRequestInfo>> {
        let group = self.load_active_group(&req.group_id).await?;
        let role = self.role_of(&group.group_id, &ctx.op_user_id).await?;
        authorize(Operation::ViewApplications, &Self::actor(ctx, role), None)?;

        let requests = self.store.find_group_requests(&group.group_id).await?;
        let user_ids: Vec<String> = requests.iter().map(|r| r.user_id.clone()).collect();
        let profiles = self.users.get_users_info_map(&distinct(user_ids)).await?;
        Ok(requests
            .iter()
            .map(|request| {
                let mut info = GroupRequestInfo::from(request);
                if let Some(profile) = profiles.get(&request.user_id) {
                    info.nickname = profile.nickname.clone();
                    info.face_url = profile.face_url.clone();
                }
                info
            })
            .collect())
    }

    pub async fn get_joined_group_list(
        &self,
        ctx: &RequestContext,
        req: GetJoinedGroupListReq,
    ) -> AppResult<Vec<GroupInfo>> {
        let user_id = if req.user_id.is_empty() {
            ctx.op_user_id.as_str()
        } else {
            req.user_id.as_str()
        };
        Self::check_self_or_admin(ctx, user_id)?;
        let group_ids = self.store.find_joined_group_ids(user_id).await?;
        let groups = self.store.find_groups(&group_ids).await?;
        view::group_infos(self.store.as_ref(), &groups).await
    }
}
